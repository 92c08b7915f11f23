//! Startup orchestration.
//!
//! # Responsibilities
//! - Build and load the backend once before accepting traffic
//! - Choose the frontend: dev session or prebuilt static bundle
//! - Start the source watcher and rebuild loop in development
//! - Serve until shutdown, then tear the dev session down
//!
//! # Design Decisions
//! - Fail fast: any startup error is fatal
//! - The listener is opened only after the first route table is live
//! - The caller supplies the bind step so tests can use port 0

use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::net::TcpListener;
use tokio::sync::mpsc;

use crate::assets::{static_router, DevSessionSlot};
use crate::build::{ArtifactStore, Bundler};
use crate::config::{HotrouteConfig, Mode};
use crate::http::HttpServer;
use crate::lifecycle::Shutdown;
use crate::reload::{ChangeEvent, ChangeFilter, ChangeWatcher, RebuildError, RebuildPipeline};
use crate::routing::{LiveRoutes, ModuleLoader};

#[derive(Debug, Error)]
pub enum StartupError {
    #[error("initial backend build failed: {0}")]
    InitialBuild(#[source] RebuildError),

    #[error("could not bind {address}: {source}")]
    Bind {
        address: String,
        #[source]
        source: std::io::Error,
    },

    #[error("could not watch backend sources: {0}")]
    Watch(#[source] notify::Error),

    #[error("could not attach dev session: {0}")]
    DevSession(#[source] notify::Error),

    #[error("static asset directory {} does not exist; build the client first", .0.display())]
    MissingStaticDir(PathBuf),

    #[error("server error: {0}")]
    Serve(#[source] std::io::Error),
}

/// The assembled dev server.
pub struct App<B, L> {
    config: HotrouteConfig,
    pipeline: Arc<RebuildPipeline<B, L>>,
    sessions: DevSessionSlot,
}

impl<B: Bundler, L: ModuleLoader> App<B, L> {
    pub fn new(config: HotrouteConfig, bundler: B, loader: L) -> Self {
        let backend = &config.backend;
        let store = ArtifactStore::new(backend.out_dir.clone(), backend.name.clone(), backend.retain);
        let pipeline = RebuildPipeline::new(
            backend.entry.clone(),
            bundler,
            loader,
            store,
            LiveRoutes::new(),
        )
        .with_debounce(Duration::from_millis(backend.watch.debounce_ms));

        Self {
            config,
            pipeline: Arc::new(pipeline),
            sessions: DevSessionSlot::new(),
        }
    }

    pub fn config(&self) -> &HotrouteConfig {
        &self.config
    }

    pub fn live_routes(&self) -> &LiveRoutes {
        self.pipeline.live_routes()
    }

    pub fn pipeline(&self) -> &Arc<RebuildPipeline<B, L>> {
        &self.pipeline
    }

    pub fn dev_sessions(&self) -> &DevSessionSlot {
        &self.sessions
    }

    /// Run until `shutdown` is triggered.
    ///
    /// `bind` is awaited once the initial build is live and the frontend is
    /// ready, so clients never connect to a server with no routes.
    pub async fn run<F>(self, bind: F, shutdown: Shutdown) -> Result<(), StartupError>
    where
        F: Future<Output = Result<TcpListener, StartupError>>,
    {
        let mode = self.config.server.mode;
        tracing::info!(%mode, entry = %self.pipeline.entry().display(), "Starting");

        let report = self
            .pipeline
            .rebuild()
            .await
            .map_err(StartupError::InitialBuild)?;
        tracing::info!(
            generation = report.generation,
            routes = ?report.routes,
            duration_ms = report.duration.as_millis() as u64,
            "Backend loaded"
        );

        let mut watcher = None;
        let mut rebuild_loop = None;
        let frontend = match mode {
            Mode::Production => {
                let dir = &self.config.frontend.static_dir;
                if !dir.is_dir() {
                    return Err(StartupError::MissingStaticDir(dir.clone()));
                }
                static_router(dir)
            }
            Mode::Development => {
                self.sessions
                    .attach(&self.config.frontend)
                    .map_err(StartupError::DevSession)?;

                let (source_watcher, changes) = self.spawn_watcher()?;
                watcher = Some(source_watcher);
                rebuild_loop = Some(tokio::spawn(
                    self.pipeline.clone().run(changes, shutdown.subscribe()),
                ));
                self.sessions.router()
            }
        };

        let server = HttpServer::new(&self.config, self.live_routes().clone(), frontend);
        let served = match bind.await {
            Ok(listener) => server
                .run(listener, shutdown.wait())
                .await
                .map_err(StartupError::Serve),
            Err(e) => Err(e),
        };

        // Stop the rebuild loop even if serving failed.
        shutdown.trigger();
        drop(watcher);
        self.sessions.close();
        if let Some(handle) = rebuild_loop {
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "Rebuild loop task failed");
            }
        }

        served
    }

    fn spawn_watcher(&self) -> Result<(ChangeWatcher, mpsc::Receiver<ChangeEvent>), StartupError> {
        let watch = &self.config.backend.watch;
        let dirs: Vec<PathBuf> = watch
            .dirs
            .iter()
            .filter(|dir| {
                let exists = dir.is_dir();
                if !exists {
                    tracing::warn!(dir = %dir.display(), "Watch directory does not exist, skipping");
                }
                exists
            })
            .cloned()
            .collect();

        ChangeWatcher::spawn(&dirs, ChangeFilter::from_config(watch)).map_err(StartupError::Watch)
    }
}

/// Bind `address`, for use as the bind step of [`App::run`].
pub async fn bind(address: String) -> Result<TcpListener, StartupError> {
    let listener = TcpListener::bind(&address)
        .await
        .map_err(|source| StartupError::Bind { address, source })?;
    if let Ok(local) = listener.local_addr() {
        tracing::info!(address = %local, "Listening for connections");
    }
    Ok(listener)
}
