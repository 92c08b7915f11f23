//! The rebuild sequence: build → load → swap → prune.
//!
//! # Responsibilities
//! - Run one complete rebuild and report its outcome
//! - Serialise rebuilds so two never overlap
//! - Coalesce bursts of change events into a single rebuild
//!
//! # Design Decisions
//! - A failed build or load leaves the previous table live
//! - Pruning runs only after the new generation is live
//! - Requests keep flowing to the old table while a rebuild is in flight

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use thiserror::Error;
use tokio::sync::{broadcast, mpsc, Mutex};

use crate::build::{ArtifactStore, BuildError, Bundler};
use crate::observability::metrics;
use crate::reload::watcher::ChangeEvent;
use crate::routing::{LiveRoutes, LoadError, ModuleLoader, ModuleRegistry, RouteTable};

/// A rebuild that did not change the live table.
#[derive(Debug, Error)]
pub enum RebuildError {
    #[error(transparent)]
    Build(#[from] BuildError),

    #[error(transparent)]
    Load(#[from] LoadError),

    #[error("could not prepare artifact directory: {0}")]
    OutputDir(#[source] std::io::Error),

    #[error("loader task failed: {0}")]
    LoadTask(#[source] tokio::task::JoinError),
}

/// Summary of a successful rebuild.
#[derive(Debug, Clone)]
pub struct RebuildReport {
    pub generation: u64,
    pub artifact: PathBuf,
    pub routes: Vec<String>,
    pub duration: Duration,
    pub pruned: Vec<u64>,
}

/// Owns everything needed to turn the backend entry into a live route table.
pub struct RebuildPipeline<B, L> {
    entry: PathBuf,
    bundler: B,
    loader: Arc<L>,
    artifacts: ArtifactStore,
    modules: ModuleRegistry,
    live: LiveRoutes,
    debounce: Duration,
    in_flight: Mutex<()>,
}

impl<B: Bundler, L: ModuleLoader> RebuildPipeline<B, L> {
    pub fn new(
        entry: impl Into<PathBuf>,
        bundler: B,
        loader: L,
        artifacts: ArtifactStore,
        live: LiveRoutes,
    ) -> Self {
        Self {
            entry: entry.into(),
            bundler,
            loader: Arc::new(loader),
            artifacts,
            modules: ModuleRegistry::new(),
            live,
            debounce: Duration::from_millis(50),
            in_flight: Mutex::new(()),
        }
    }

    /// Settle window before pending change events are drained.
    pub fn with_debounce(mut self, debounce: Duration) -> Self {
        self.debounce = debounce;
        self
    }

    pub fn entry(&self) -> &Path {
        &self.entry
    }

    pub fn live_routes(&self) -> &LiveRoutes {
        &self.live
    }

    pub fn artifacts(&self) -> &ArtifactStore {
        &self.artifacts
    }

    pub fn modules(&self) -> &ModuleRegistry {
        &self.modules
    }

    /// Build, load and publish a new generation.
    ///
    /// Concurrent callers are serialised; each call produces its own
    /// generation.
    pub async fn rebuild(&self) -> Result<RebuildReport, RebuildError> {
        let _guard = self.in_flight.lock().await;
        let started = Instant::now();

        let result = self.rebuild_locked(started).await;
        match &result {
            Ok(report) => {
                metrics::record_rebuild("success", started);
                metrics::set_live_generation(report.generation);
            }
            Err(RebuildError::Build(_)) | Err(RebuildError::OutputDir(_)) => {
                metrics::record_rebuild("build_error", started)
            }
            Err(RebuildError::Load(_)) | Err(RebuildError::LoadTask(_)) => {
                metrics::record_rebuild("load_error", started)
            }
        }
        result
    }

    async fn rebuild_locked(&self, started: Instant) -> Result<RebuildReport, RebuildError> {
        self.artifacts
            .ensure_dir()
            .await
            .map_err(RebuildError::OutputDir)?;

        let artifact = self.artifacts.allocate();
        tracing::info!(
            entry = %self.entry.display(),
            artifact = %artifact.path().display(),
            "Building backend"
        );

        if let Err(e) = self.bundler.bundle(&self.entry, artifact.path()).await {
            self.artifacts.discard(&artifact).await;
            return Err(e.into());
        }

        // Opening a library runs its static initialisers; keep that off the
        // runtime workers.
        let loader = self.loader.clone();
        let target = artifact.clone();
        let loaded = tokio::task::spawn_blocking(move || loader.load(&target))
            .await
            .map_err(RebuildError::LoadTask)
            .and_then(|result| result.map_err(RebuildError::from));
        let module = match loaded {
            Ok(module) => self.modules.insert(module),
            Err(e) => {
                self.artifacts.discard(&artifact).await;
                return Err(e);
            }
        };

        let table = match RouteTable::build(module.clone()) {
            Ok(table) => table,
            Err(e) => {
                self.modules.remove(module.generation());
                drop(module);
                self.artifacts.discard(&artifact).await;
                return Err(e.into());
            }
        };
        let routes = table.routes().to_vec();

        let previous = self.live.swap(table);
        tracing::info!(
            generation = artifact.token(),
            previous = previous.generation(),
            routes = routes.len(),
            duration_ms = started.elapsed().as_millis() as u64,
            "Route table swapped"
        );
        drop(previous);

        let pruned = self.artifacts.record_and_prune(&artifact).await;
        self.modules.retain_newest(self.artifacts.retain());

        Ok(RebuildReport {
            generation: artifact.token(),
            artifact: artifact.path().to_path_buf(),
            routes,
            duration: started.elapsed(),
            pruned: pruned.deleted,
        })
    }

    /// Rebuild on every batch of change events until shutdown.
    ///
    /// One event opens a batch; after the debounce window every pending event
    /// joins it and a single rebuild covers them all.
    pub async fn run(
        self: Arc<Self>,
        mut changes: mpsc::Receiver<ChangeEvent>,
        mut shutdown: broadcast::Receiver<()>,
    ) {
        loop {
            tokio::select! {
                event = changes.recv() => {
                    let Some(first) = event else {
                        tracing::info!("Change channel closed, rebuild loop exiting");
                        break;
                    };
                    tokio::time::sleep(self.debounce).await;

                    let mut batch = vec![first];
                    while let Ok(event) = changes.try_recv() {
                        batch.push(event);
                    }
                    self.rebuild_for(&batch).await;
                }
                _ = shutdown.recv() => {
                    tracing::info!("Rebuild loop received shutdown signal, exiting loop");
                    break;
                }
            }
        }
    }

    async fn rebuild_for(&self, batch: &[ChangeEvent]) {
        tracing::info!(
            changes = batch.len(),
            first = %batch[0].path.display(),
            "Source change detected, rebuilding"
        );

        match self.rebuild().await {
            Ok(report) => tracing::info!(
                generation = report.generation,
                routes = report.routes.len(),
                duration_ms = report.duration.as_millis() as u64,
                "Backend reloaded"
            ),
            Err(e) => tracing::error!(
                error = %e,
                live_generation = self.live.generation(),
                "Rebuild failed, keeping current routes"
            ),
        }
    }
}
