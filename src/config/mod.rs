//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → loader.rs (PORT / HOTROUTE_MODE overrides)
//!     → validation.rs (semantic checks)
//!     → HotrouteConfig (validated, immutable)
//!     → handed by value to each subsystem at startup
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; only backend routes hot-reload
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{apply_env, load_config, ConfigError};
pub use schema::{
    BackendConfig, FrontendConfig, HotrouteConfig, LoggingConfig, Mode, ObservabilityConfig,
    ServerConfig, WatchConfig,
};
pub use validation::{validate_config, ValidationError};
