//! Frontend asset serving.
//!
//! # Data Flow
//! ```text
//! Development (dev.rs):
//!     Request outside the API prefix
//!         → DevSessionSlot (current session)
//!         → "/" or *.html → template from disk → transform.rs pipeline
//!         → other paths  → ServeDir over the client root (no-cache)
//!
//! Production (static_files.rs):
//!     Request outside the API prefix
//!         → ServeDir over the static directory
//!         → index.html for anything missing
//! ```
//!
//! # Design Decisions
//! - The API prefix is mounted before these routers, so an unmatched API
//!   path never reaches the frontend

pub mod dev;
pub mod static_files;
pub mod transform;

pub use dev::{DevEvent, DevSession, DevSessionSlot, EVENTS_PATH};
pub use static_files::{static_router, static_service};
pub use transform::{
    bust_client_entry, cache_bust_token, CacheBust, HtmlPipeline, HtmlTransform,
    ReloadClientInjector, TransformError, RELOAD_CLIENT_PATH,
};
