//! Routing subsystem.
//!
//! # Data Flow
//! ```text
//! BuildArtifact
//!     → loader.rs (open library, check manifest, resolve `register_routes`)
//!     → ModuleRegistry (handle keyed by generation)
//!     → table.rs (fresh RouteRegistrar → RouteTable, in isolation)
//!     → LiveRoutes::swap (single atomic pointer store)
//!
//! Incoming request under the API prefix (matcher.rs)
//!     → LiveRoutes::current() (pin the table)
//!     → RouteTable::dispatch
//! ```
//!
//! # Design Decisions
//! - Tables are immutable once published; reloads replace them whole
//! - Deterministic: same input always matches same route
//! - Unmatched API paths get a JSON 404, never the frontend

pub mod loader;
pub mod matcher;
pub mod registrar;
pub mod table;

pub use loader::{DylibLoader, LoadError, LoadedModule, ModuleLoader, ModuleRegistry};
pub use matcher::ApiPrefix;
pub use registrar::{
    not_found, PluginManifest, PluginManifestFn, RegisterRoutesFn, RouteRegistrar,
    PLUGIN_ABI_VERSION, PLUGIN_MANIFEST_SYMBOL, REGISTER_ROUTES_SYMBOL,
};
pub use table::{ApiService, LiveRoutes, RouteTable};
