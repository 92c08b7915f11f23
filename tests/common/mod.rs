//! Shared utilities for integration testing.
//!
//! The backend "source" used here is a text file with one route per line:
//!
//! ```text
//! GET /hello {"message":"Hello, world!"}
//! ```
//!
//! `FakeBundler` copies it into the artifact (or fails on `syntax error`),
//! `FakeLoader` turns each line into a JSON route (or reports a contract
//! violation when the file starts with `no-export`). That drives the real
//! pipeline, watcher and server without a native toolchain.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::{http::header, routing::get};
use hotroute::build::{BuildArtifact, BuildError, Bundler};
use hotroute::config::{HotrouteConfig, Mode};
use hotroute::lifecycle::{App, Shutdown, StartupError};
use hotroute::routing::{LoadError, LoadedModule, ModuleLoader, REGISTER_ROUTES_SYMBOL};
use hotroute::assets::DevSessionSlot;
use hotroute::{LiveRoutes, RebuildPipeline};
use tempfile::TempDir;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

pub const HELLO_SOURCE: &str = r#"GET /hello {"message":"Hello, world!"}"#;

pub const INDEX_HTML: &str = r#"<!doctype html>
<html>
  <head><title>test</title></head>
  <body>
    <div id="root"></div>
    <script type="module" src="/src/main.js"></script>
  </body>
</html>"#;

#[derive(Clone, Default)]
pub struct FakeBundler {
    pub builds: Arc<AtomicUsize>,
    pub delay_ms: Arc<AtomicU64>,
}

impl FakeBundler {
    pub fn builds(&self) -> usize {
        self.builds.load(Ordering::SeqCst)
    }

    pub fn set_delay(&self, delay: Duration) {
        self.delay_ms.store(delay.as_millis() as u64, Ordering::SeqCst);
    }
}

impl Bundler for FakeBundler {
    async fn bundle(&self, entry: &Path, out: &Path) -> Result<(), BuildError> {
        let delay = self.delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }

        let source = tokio::fs::read_to_string(entry).await;
        self.builds.fetch_add(1, Ordering::SeqCst);
        let source = source?;

        if source.contains("syntax error") {
            return Err(BuildError::Compile {
                status: Some(101),
                stderr: format!("error: {}", source.trim()),
            });
        }
        tokio::fs::write(out, source).await?;
        Ok(())
    }
}

pub struct FakeLoader;

impl ModuleLoader for FakeLoader {
    fn load(&self, artifact: &BuildArtifact) -> Result<LoadedModule, LoadError> {
        let source = std::fs::read_to_string(artifact.path()).map_err(|e| LoadError::Open {
            path: artifact.path().to_path_buf(),
            message: e.to_string(),
        })?;
        if source.trim_start().starts_with("no-export") {
            return Err(LoadError::ContractViolation {
                path: artifact.path().to_path_buf(),
                symbol: REGISTER_ROUTES_SYMBOL,
            });
        }

        let routes: Vec<(String, String)> = source
            .lines()
            .filter_map(|line| {
                let rest = line.trim().strip_prefix("GET ")?;
                let (path, body) = rest.split_once(' ')?;
                Some((path.to_string(), body.to_string()))
            })
            .collect();

        Ok(LoadedModule::new(artifact.token(), artifact.path(), move |r| {
            for (path, body) in &routes {
                let body = body.clone();
                r.route(
                    path,
                    get(move || {
                        let body = body.clone();
                        async move { ([(header::CONTENT_TYPE, "application/json")], body) }
                    }),
                );
            }
        }))
    }
}

/// A throwaway project tree: backend source, client root, static bundle.
pub struct Project {
    pub dir: TempDir,
}

impl Project {
    pub fn new(source: &str) -> Self {
        let dir = TempDir::new().unwrap();
        let root = dir.path();

        std::fs::create_dir_all(root.join("backend/src")).unwrap();
        std::fs::write(root.join("backend/src/routes.txt"), source).unwrap();

        std::fs::create_dir_all(root.join("client/src")).unwrap();
        std::fs::write(root.join("client/index.html"), INDEX_HTML).unwrap();
        std::fs::write(root.join("client/src/main.js"), "console.log('app')").unwrap();

        std::fs::create_dir_all(root.join("public/assets")).unwrap();
        std::fs::write(root.join("public/index.html"), "<html>built spa</html>").unwrap();
        std::fs::write(root.join("public/assets/app.js"), "console.log('built')").unwrap();

        Self { dir }
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn entry(&self) -> PathBuf {
        self.path().join("backend/src/routes.txt")
    }

    pub fn out_dir(&self) -> PathBuf {
        self.path().join("dist/backend")
    }

    pub fn write_source(&self, source: &str) {
        std::fs::write(self.entry(), source).unwrap();
    }

    pub fn config(&self, mode: Mode) -> HotrouteConfig {
        let mut config = HotrouteConfig::default();
        config.server.host = "127.0.0.1".to_string();
        config.server.port = 0;
        config.server.mode = mode;

        config.backend.entry = self.entry();
        config.backend.out_dir = self.out_dir();
        config.backend.watch.dirs = vec![self.path().join("backend/src")];
        config.backend.watch.extension = "txt".to_string();
        config.backend.watch.debounce_ms = 20;

        config.frontend.root = self.path().join("client");
        config.frontend.static_dir = self.path().join("public");
        config
    }
}

/// A running server plus handles into its internals.
pub struct Running {
    pub addr: SocketAddr,
    pub shutdown: Shutdown,
    pub live: LiveRoutes,
    pub pipeline: Arc<RebuildPipeline<FakeBundler, FakeLoader>>,
    pub sessions: DevSessionSlot,
    pub handle: JoinHandle<Result<(), StartupError>>,
}

impl Running {
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    /// Stop the server and return how `App::run` ended.
    pub async fn stop(self) -> Result<(), StartupError> {
        self.shutdown.trigger();
        tokio::time::timeout(Duration::from_secs(10), self.handle)
            .await
            .expect("server did not stop")
            .expect("server task panicked")
    }
}

pub async fn spawn_app(config: HotrouteConfig, bundler: FakeBundler) -> Running {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let app = App::new(config, bundler, FakeLoader);
    let live = app.live_routes().clone();
    let pipeline = app.pipeline().clone();
    let sessions = app.dev_sessions().clone();

    let shutdown = Shutdown::new();
    let handle = tokio::spawn(app.run(async move { Ok(listener) }, shutdown.clone()));

    Running {
        addr,
        shutdown,
        live,
        pipeline,
        sessions,
        handle,
    }
}

/// Start a server and wait until it answers requests.
///
/// The socket is bound up front so the port is known; the first request
/// queues in the backlog until `App::run` accepts, after the initial build.
pub async fn start(config: HotrouteConfig, bundler: FakeBundler) -> Running {
    let running = spawn_app(config, bundler).await;
    tokio::time::timeout(Duration::from_secs(10), reqwest::get(running.url("/api/__ready")))
        .await
        .expect("server did not start")
        .expect("server refused the first request");
    assert!(running.live.generation() > 0);
    running
}

/// Poll `condition` until it holds or `timeout` elapses.
pub async fn wait_for(timeout: Duration, mut condition: impl FnMut() -> bool) {
    tokio::time::timeout(timeout, async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition not met in time");
}

pub async fn get_json(url: &str) -> (u16, serde_json::Value) {
    let response = reqwest::get(url).await.unwrap();
    let status = response.status().as_u16();
    (status, response.json().await.unwrap())
}

pub async fn get_text(url: &str) -> (u16, String) {
    let response = reqwest::get(url).await.unwrap();
    let status = response.status().as_u16();
    (status, response.text().await.unwrap())
}
