//! Backend source watcher.
//!
//! Watches the backend and shared source trees and forwards actionable
//! changes to the rebuild pipeline. Classification is a pure function so the
//! filtering policy can be tested without touching the filesystem.

use std::path::{Component, Path, PathBuf};

use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;

use crate::config::WatchConfig;

/// Pending change events buffered between the watcher and the pipeline.
const CHANNEL_CAPACITY: usize = 256;

/// File change event type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Created,
    Modified,
    Removed,
}

impl ChangeKind {
    fn from_event(kind: &EventKind) -> Option<Self> {
        match kind {
            EventKind::Create(_) => Some(ChangeKind::Created),
            EventKind::Modify(_) => Some(ChangeKind::Modified),
            EventKind::Remove(_) => Some(ChangeKind::Removed),
            _ => None,
        }
    }
}

/// One filesystem change, consumed once by the rebuild pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeEvent {
    pub kind: ChangeKind,
    pub path: PathBuf,
}

/// Classification of a changed path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeClass {
    /// Triggers a rebuild.
    Actionable,
    /// The host's own entry file; never triggers a rebuild.
    SelfChange,
    /// Wrong extension, ignored directory or hidden file.
    Ignored,
}

/// Decides which changed paths trigger a rebuild.
///
/// Hidden and ignored names are matched only below a watched root, so a
/// project living under `~/.work` or `/srv/target` still rebuilds.
#[derive(Debug, Clone)]
pub struct ChangeFilter {
    extension: String,
    self_entry: PathBuf,
    ignore: Vec<String>,
    roots: Vec<PathBuf>,
}

impl ChangeFilter {
    pub fn new(extension: impl Into<String>, self_entry: impl Into<PathBuf>, ignore: Vec<String>) -> Self {
        let extension = extension.into().trim_start_matches('.').to_string();
        Self {
            extension,
            self_entry: absolute(&self_entry.into()),
            ignore,
            roots: Vec::new(),
        }
    }

    pub fn from_config(config: &WatchConfig) -> Self {
        Self::new(config.extension.clone(), config.self_entry.clone(), config.ignore.clone())
    }

    /// Watched directories; components above them are never inspected.
    pub fn with_roots<P: AsRef<Path>>(mut self, roots: &[P]) -> Self {
        for root in roots {
            let root = root.as_ref();
            for spelling in [lexical_absolute(root), absolute(root)] {
                if !self.roots.contains(&spelling) {
                    self.roots.push(spelling);
                }
            }
        }
        // Longest first, so nested roots strip as much as possible.
        self.roots.sort_by_key(|root| std::cmp::Reverse(root.components().count()));
        self
    }

    pub fn roots(&self) -> &[PathBuf] {
        &self.roots
    }

    fn below_root<'a>(&self, path: &'a Path) -> Option<&'a Path> {
        self.roots.iter().find_map(|root| path.strip_prefix(root).ok())
    }

    pub fn classify(&self, path: &Path) -> ChangeClass {
        // notify may spell the root differently (symlinks, relative watch
        // paths), so the resolved path is tried too. Paths outside every
        // root are judged by their file name alone.
        let resolved = absolute(path);
        let relative = self
            .below_root(path)
            .or_else(|| self.below_root(&resolved))
            .unwrap_or_else(|| path.file_name().map(Path::new).unwrap_or(path));

        for component in relative.components() {
            if let Component::Normal(name) = component {
                let name = name.to_string_lossy();
                if name.starts_with('.') || self.ignore.iter().any(|i| *i == name) {
                    return ChangeClass::Ignored;
                }
            }
        }

        let has_extension = path
            .extension()
            .map(|ext| ext.to_string_lossy() == self.extension)
            .unwrap_or(false);
        if !has_extension {
            return ChangeClass::Ignored;
        }

        if resolved == self.self_entry {
            return ChangeClass::SelfChange;
        }

        ChangeClass::Actionable
    }
}

/// Make `path` absolute against the current directory, canonicalising when
/// the file exists so symlinked roots compare equal.
fn absolute(path: &Path) -> PathBuf {
    if let Ok(canonical) = path.canonicalize() {
        return canonical;
    }
    lexical_absolute(path)
}

fn lexical_absolute(path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .map(|cwd| cwd.join(path))
            .unwrap_or_else(|_| path.to_path_buf())
    }
}

/// A running recursive watch over the backend source directories.
///
/// Dropping the watcher stops event delivery.
pub struct ChangeWatcher {
    _watcher: RecommendedWatcher,
    dirs: Vec<PathBuf>,
}

impl ChangeWatcher {
    /// Start watching `dirs`. Returns the watcher and the receiver of
    /// actionable change events.
    ///
    /// Only changes after this call are reported; files that already exist
    /// produce no events.
    pub fn spawn(
        dirs: &[PathBuf],
        filter: ChangeFilter,
    ) -> Result<(Self, mpsc::Receiver<ChangeEvent>), notify::Error> {
        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        let filter = filter.with_roots(dirs);

        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| match res {
                Ok(event) => {
                    let Some(kind) = ChangeKind::from_event(&event.kind) else {
                        return;
                    };
                    for path in event.paths {
                        match filter.classify(&path) {
                            ChangeClass::Actionable => {
                                // A full channel already guarantees a pending rebuild.
                                let _ = tx.try_send(ChangeEvent { kind, path });
                            }
                            ChangeClass::SelfChange => {
                                tracing::debug!(path = %path.display(), "Ignoring change to host entry file");
                            }
                            ChangeClass::Ignored => {}
                        }
                    }
                }
                Err(e) => tracing::error!("Watch error: {:?}", e),
            },
            Config::default(),
        )?;

        let mut watched = Vec::with_capacity(dirs.len());
        for dir in dirs {
            watcher.watch(dir, RecursiveMode::Recursive)?;
            watched.push(absolute(dir));
        }

        tracing::info!(dirs = ?watched, "Backend source watcher started");
        Ok((
            Self {
                _watcher: watcher,
                dirs: watched,
            },
            rx,
        ))
    }

    pub fn dirs(&self) -> &[PathBuf] {
        &self.dirs
    }
}
