//! Real backend plugins: built by cargo through `CommandBundler`, opened by
//! `DylibLoader`, served from the live table.
//!
//! The plugin source lives in `tests/fixtures/route_plugin.rs`; each test
//! run writes a throwaway crate around it that depends on this checkout and
//! reuses its `Cargo.lock`, so the plugin links the same dependency versions
//! as the host.

use std::env::consts::{DLL_EXTENSION, DLL_PREFIX, DLL_SUFFIX};
use std::path::{Path, PathBuf};

use axum::{
    body::Body,
    http::{Request, StatusCode},
    response::Response,
};
use hotroute::build::{ArtifactStore, CommandBundler};
use hotroute::reload::{RebuildError, RebuildPipeline};
use hotroute::routing::{DylibLoader, LiveRoutes, LoadError};
use serde_json::{json, Value};
use tempfile::TempDir;
use tower::ServiceExt;

const PLUGIN_SOURCE: &str = include_str!("fixtures/route_plugin.rs");

/// A cdylib crate wrapping the fixture source.
struct PluginCrate {
    dir: TempDir,
}

impl PluginCrate {
    fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let host = env!("CARGO_MANIFEST_DIR");
        let manifest = format!(
            r#"[package]
name = "route-plugin"
version = "0.1.0"
edition = "2021"
publish = false

[lib]
path = "lib.rs"
crate-type = ["cdylib"]

[features]
duplicate-route = []
no-export = []

[dependencies]
hotroute = {{ path = {host:?} }}
serde_json = "1"
tokio = {{ version = "1", features = ["rt", "time"] }}

[workspace]
"#
        );
        std::fs::write(dir.path().join("Cargo.toml"), manifest).unwrap();
        std::fs::write(dir.path().join("lib.rs"), PLUGIN_SOURCE).unwrap();

        let lock = Path::new(host).join("Cargo.lock");
        if lock.is_file() {
            std::fs::copy(lock, dir.path().join("Cargo.lock")).unwrap();
        }
        Self { dir }
    }

    fn manifest(&self) -> PathBuf {
        self.dir.path().join("Cargo.toml")
    }

    /// A pipeline building this crate with `features`, publishing into `live`.
    fn pipeline(&self, features: &str, live: &LiveRoutes) -> RebuildPipeline<CommandBundler, DylibLoader> {
        let target = Path::new(env!("CARGO_TARGET_TMPDIR")).join("route-plugin");
        let output = target
            .join("debug")
            .join(format!("{DLL_PREFIX}route_plugin{DLL_SUFFIX}"));

        let mut args: Vec<String> = ["build", "--lib", "--manifest-path", "{entry}", "--target-dir"]
            .iter()
            .map(|arg| arg.to_string())
            .collect();
        args.push(target.to_string_lossy().into_owned());
        if !features.is_empty() {
            args.push("--features".to_string());
            args.push(features.to_string());
        }

        let store = ArtifactStore::new(self.dir.path().join("dist"), "plugin", 2)
            .with_extension(DLL_EXTENSION);
        RebuildPipeline::new(
            self.manifest(),
            CommandBundler::new(env!("CARGO"), args, output),
            DylibLoader,
            store,
            live.clone(),
        )
    }
}

async fn get(live: &LiveRoutes, path: &str) -> (StatusCode, Value) {
    let response: Response = live
        .api_service()
        .oneshot(Request::get(path).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, serde_json::from_slice(&bytes).unwrap())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_native_plugin_lifecycle() {
    let plugin = PluginCrate::new();
    let live = LiveRoutes::new();

    let report = plugin.pipeline("", &live).rebuild().await.unwrap();
    assert_eq!(report.routes, vec!["/hello", "/sleepy", "/boom"]);
    assert_eq!(live.generation(), report.generation);

    let (status, body) = get(&live, "/hello").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "message": "Hello, world!" }));

    // Timers and spawns inside the plugin run on the host runtime.
    let (status, body) = get(&live, "/sleepy").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "slept": true, "spawned": 42 }));

    // A handler panic is answered inside the plugin, never unwinding into the host.
    let (status, body) = get(&live, "/boom").await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body, json!({ "message": "Internal Server Error" }));

    let (status, body) = get(&live, "/missing").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body, json!({ "message": "API route not found" }));

    // A duplicate route panics during registration; the host keeps running.
    let err = plugin
        .pipeline("duplicate-route", &live)
        .rebuild()
        .await
        .unwrap_err();
    assert!(
        matches!(err, RebuildError::Load(LoadError::RegistrationPanicked { .. })),
        "{err}"
    );
    assert_eq!(live.generation(), report.generation);

    // A library without the exports is a contract violation.
    let err = plugin.pipeline("no-export", &live).rebuild().await.unwrap_err();
    assert!(
        matches!(err, RebuildError::Load(LoadError::ContractViolation { .. })),
        "{err}"
    );
    assert_eq!(live.generation(), report.generation);

    let (status, body) = get(&live, "/hello").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "message": "Hello, world!" }));
}
