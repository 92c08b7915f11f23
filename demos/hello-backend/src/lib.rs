//! Demo backend for hotroute.
//!
//! Build it through the host (`hotroute --config demos/hotroute.toml`); edit
//! the greeting below while the host runs and the next request to
//! `/api/hello` answers from the rebuilt library.

use hotroute::axum::{routing::get, Json};
use hotroute::RouteRegistrar;
use serde_json::{json, Value};

async fn hello() -> Json<Value> {
    Json(json!({ "message": "Hello, world!" }))
}

fn routes(routes: &mut RouteRegistrar) {
    routes.route("/hello", get(hello));
}

hotroute::export_routes!(routes);
