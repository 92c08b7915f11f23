//! Backend plugin compiled by `tests/native_plugin.rs`.
//!
//! Features pick the failure being exercised:
//! - `duplicate-route`: registration panics inside the plugin
//! - `no-export`: the library exports nothing

#![cfg_attr(feature = "no-export", allow(dead_code))]

use std::time::Duration;

use hotroute::axum::{routing::get, Json};
use hotroute::RouteRegistrar;
use serde_json::{json, Value};

async fn hello() -> Json<Value> {
    Json(json!({ "message": "Hello, world!" }))
}

async fn sleepy() -> Json<Value> {
    tokio::time::sleep(Duration::from_millis(5)).await;
    let spawned = tokio::spawn(async { 21 * 2 }).await.unwrap_or(0);
    Json(json!({ "slept": true, "spawned": spawned }))
}

async fn boom() -> &'static str {
    if true {
        panic!("plugin handler blew up");
    }
    "unreachable"
}

fn routes(routes: &mut RouteRegistrar) {
    routes.route("/hello", get(hello));
    routes.route("/sleepy", get(sleepy));
    routes.route("/boom", get(boom));

    #[cfg(feature = "duplicate-route")]
    routes.route("/hello", get(hello));
}

#[cfg(not(feature = "no-export"))]
hotroute::export_routes!(routes);
