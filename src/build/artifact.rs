//! Build artifact naming, listing and retention.
//!
//! # Responsibilities
//! - Allocate a unique, timestamp-named path for every build
//! - List the artifacts belonging to one entry point, newest first
//! - Prune all but the newest `retain` artifacts after a successful load
//!
//! # Design Decisions
//! - The file name embeds a millisecond token: `{name}-{token}.backend.{ext}`
//! - Tokens are strictly increasing within a process, so recency is a
//!   numeric comparison and two builds can never share a path
//! - Deletion failures are logged and swallowed

use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use thiserror::Error;

/// Fixed marker between the token and the platform library extension.
pub const ARTIFACT_MARKER: &str = ".backend";

/// One compiled backend library on disk. Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildArtifact {
    token: u64,
    path: PathBuf,
}

impl BuildArtifact {
    pub fn new(token: u64, path: impl Into<PathBuf>) -> Self {
        Self {
            token,
            path: path.into(),
        }
    }

    /// Creation timestamp token (milliseconds since the Unix epoch).
    pub fn token(&self) -> u64 {
        self.token
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn created_at(&self) -> SystemTime {
        UNIX_EPOCH + Duration::from_millis(self.token)
    }
}

/// A stale artifact could not be removed.
#[derive(Debug, Error)]
#[error("failed to delete stale artifact {}: {source}", .path.display())]
pub struct CleanupError {
    pub path: PathBuf,
    #[source]
    pub source: io::Error,
}

/// Outcome of a pruning pass.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PruneReport {
    /// Tokens still on disk, newest first.
    pub retained: Vec<u64>,
    /// Tokens removed by this pass.
    pub deleted: Vec<u64>,
    /// Deletions that failed (kept for the next pass).
    pub failed: usize,
}

/// Names and cleans up artifacts for a single backend entry point.
#[derive(Debug)]
pub struct ArtifactStore {
    out_dir: PathBuf,
    name: String,
    extension: String,
    retain: usize,
    last_token: AtomicU64,
}

impl ArtifactStore {
    /// Create a store writing `{name}-{token}.backend.{DLL_EXTENSION}` files
    /// into `out_dir` and keeping the newest `retain` of them.
    pub fn new(out_dir: impl Into<PathBuf>, name: impl Into<String>, retain: usize) -> Self {
        Self {
            out_dir: out_dir.into(),
            name: name.into(),
            extension: std::env::consts::DLL_EXTENSION.to_string(),
            retain: retain.max(1),
            last_token: AtomicU64::new(0),
        }
    }

    /// Override the file extension (tests and non-native bundlers).
    pub fn with_extension(mut self, extension: impl Into<String>) -> Self {
        self.extension = extension.into();
        self
    }

    pub fn out_dir(&self) -> &Path {
        &self.out_dir
    }

    pub fn retain(&self) -> usize {
        self.retain
    }

    /// Create the output directory if it does not exist.
    pub async fn ensure_dir(&self) -> io::Result<()> {
        tokio::fs::create_dir_all(&self.out_dir).await
    }

    /// Reserve a fresh artifact path. Nothing is written yet.
    pub fn allocate(&self) -> BuildArtifact {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64;

        let mut last = self.last_token.load(Ordering::Relaxed);
        let token = loop {
            let candidate = now.max(last + 1);
            match self.last_token.compare_exchange_weak(
                last,
                candidate,
                Ordering::AcqRel,
                Ordering::Relaxed,
            ) {
                Ok(_) => break candidate,
                Err(actual) => last = actual,
            }
        };

        BuildArtifact {
            token,
            path: self.out_dir.join(self.file_name(token)),
        }
    }

    fn file_name(&self, token: u64) -> String {
        format!("{}-{}{}.{}", self.name, token, ARTIFACT_MARKER, self.extension)
    }

    /// Extract the token from a file name belonging to this store.
    pub fn parse_token(&self, file_name: &str) -> Option<u64> {
        let suffix = format!("{}.{}", ARTIFACT_MARKER, self.extension);
        let token = file_name
            .strip_prefix(self.name.as_str())?
            .strip_prefix('-')?
            .strip_suffix(suffix.as_str())?;

        if token.is_empty() || !token.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        token.parse().ok()
    }

    /// All artifacts of this entry point on disk, newest first.
    pub async fn list(&self) -> io::Result<Vec<BuildArtifact>> {
        let mut artifacts = Vec::new();
        let mut entries = match tokio::fs::read_dir(&self.out_dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(artifacts),
            Err(e) => return Err(e),
        };

        while let Some(entry) = entries.next_entry().await? {
            let file_name = entry.file_name();
            let Some(token) = file_name.to_str().and_then(|n| self.parse_token(n)) else {
                continue;
            };
            artifacts.push(BuildArtifact {
                token,
                path: entry.path(),
            });
        }

        artifacts.sort_by(|a, b| b.token.cmp(&a.token));
        Ok(artifacts)
    }

    /// Record a freshly loaded artifact and delete everything older than the
    /// newest `retain` artifacts. Runs only after the load step.
    pub async fn record_and_prune(&self, loaded: &BuildArtifact) -> PruneReport {
        tracing::debug!(
            artifact = %loaded.path().display(),
            token = loaded.token(),
            "Recording loaded artifact"
        );

        let artifacts = match self.list().await {
            Ok(artifacts) => artifacts,
            Err(e) => {
                tracing::warn!(
                    out_dir = %self.out_dir.display(),
                    error = %e,
                    "Could not list artifacts, skipping prune"
                );
                return PruneReport::default();
            }
        };

        let mut report = PruneReport::default();
        for (index, artifact) in artifacts.into_iter().enumerate() {
            if index < self.retain {
                report.retained.push(artifact.token);
                continue;
            }
            match remove(&artifact.path).await {
                Ok(()) => report.deleted.push(artifact.token),
                Err(e) => {
                    tracing::warn!(error = %e, "Stale artifact left on disk");
                    report.retained.push(artifact.token);
                    report.failed += 1;
                }
            }
        }

        if !report.deleted.is_empty() {
            tracing::debug!(deleted = ?report.deleted, retained = ?report.retained, "Pruned artifacts");
        }
        report
    }

    /// Best-effort removal of an artifact that will never be loaded.
    pub async fn discard(&self, artifact: &BuildArtifact) {
        match remove(artifact.path()).await {
            Ok(()) => {}
            Err(e) if e.source.kind() == io::ErrorKind::NotFound => {}
            Err(e) => tracing::warn!(error = %e, "Could not discard artifact"),
        }
    }
}

async fn remove(path: &Path) -> Result<(), CleanupError> {
    tokio::fs::remove_file(path).await.map_err(|source| CleanupError {
        path: path.to_path_buf(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn store(dir: &TempDir) -> ArtifactStore {
        ArtifactStore::new(dir.path(), "server", 2).with_extension("so")
    }

    #[test]
    fn test_tokens_strictly_increase() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);

        let tokens: Vec<u64> = (0..50).map(|_| store.allocate().token()).collect();
        for pair in tokens.windows(2) {
            assert!(pair[1] > pair[0]);
        }
    }

    #[test]
    fn test_file_name_embeds_token() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        let artifact = store.allocate();

        let name = artifact.path().file_name().unwrap().to_str().unwrap().to_string();
        assert_eq!(name, format!("server-{}.backend.so", artifact.token()));
        assert_eq!(store.parse_token(&name), Some(artifact.token()));
        assert_eq!(
            artifact.created_at(),
            UNIX_EPOCH + Duration::from_millis(artifact.token())
        );
    }

    #[test]
    fn test_parse_token_rejects_foreign_files() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);

        assert_eq!(store.parse_token("server-12.backend.so"), Some(12));
        assert_eq!(store.parse_token("other-12.backend.so"), None);
        assert_eq!(store.parse_token("server-12.backend.dll"), None);
        assert_eq!(store.parse_token("server-.backend.so"), None);
        assert_eq!(store.parse_token("server-1a.backend.so"), None);
        assert_eq!(store.parse_token("server-worker-12.backend.so"), None);
    }

    #[tokio::test]
    async fn test_prune_keeps_newest_two() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);

        let mut artifacts = Vec::new();
        for _ in 0..5 {
            let artifact = store.allocate();
            tokio::fs::write(artifact.path(), b"lib").await.unwrap();
            artifacts.push(artifact);
        }
        tokio::fs::write(dir.path().join("notes.txt"), b"keep me").await.unwrap();

        let newest = artifacts.last().unwrap();
        let report = store.record_and_prune(newest).await;

        assert_eq!(report.retained, vec![artifacts[4].token(), artifacts[3].token()]);
        assert_eq!(report.deleted.len(), 3);
        assert_eq!(report.failed, 0);

        let remaining = store.list().await.unwrap();
        assert_eq!(remaining.len(), 2);
        assert_eq!(remaining[0], artifacts[4]);
        assert_eq!(remaining[1], artifacts[3]);
        assert!(dir.path().join("notes.txt").exists());
    }

    #[tokio::test]
    async fn test_list_missing_dir_is_empty() {
        let dir = TempDir::new().unwrap();
        let store = ArtifactStore::new(dir.path().join("nope"), "server", 2);
        assert!(store.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_discard_missing_file_is_silent() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        let artifact = store.allocate();
        store.discard(&artifact).await;
        assert!(!artifact.path().exists());
    }
}
