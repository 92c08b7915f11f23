//! Live backend reload and dev asset serving.
//!
//! The backend is a `cdylib` exporting `register_routes` (see
//! [`export_routes!`]). Every source change rebuilds it into a uniquely named
//! artifact, loads that as a new generation and swaps the live API route
//! table in one atomic step. Everything outside the API prefix is served by
//! the dev asset server in development and by the static bundle in
//! production.

pub mod assets;
pub mod build;
pub mod config;
pub mod http;
pub mod lifecycle;
pub mod observability;
pub mod reload;
pub mod routing;

pub use build::{CommandBundler, Bundler};
pub use config::HotrouteConfig;
pub use http::HttpServer;
pub use lifecycle::{App, Shutdown, StartupError};
pub use reload::RebuildPipeline;
pub use routing::{DylibLoader, LiveRoutes, ModuleLoader, RouteRegistrar};

/// Re-exported so backends can build handlers against the host's axum.
pub use axum;
