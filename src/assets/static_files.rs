//! Production static serving.
//!
//! Serves the prebuilt client bundle. Paths that match no file fall through
//! to `index.html` with a 200 so client-side routing keeps working.

use std::path::Path;

use axum::Router;
use tower_http::services::{ServeDir, ServeFile};

/// File served for any path that does not exist in the bundle.
pub const INDEX_FILE: &str = "index.html";

pub fn static_service(dir: &Path) -> ServeDir<ServeFile> {
    ServeDir::new(dir).fallback(ServeFile::new(dir.join(INDEX_FILE)))
}

/// Router for everything outside the API prefix in production mode.
pub fn static_router(dir: &Path) -> Router {
    Router::new().fallback_service(static_service(dir))
}
