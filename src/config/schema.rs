//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the host.
//! All types derive Serde traits for deserialization from config files.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Root configuration for the hotroute host.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct HotrouteConfig {
    /// Listener and mode settings.
    pub server: ServerConfig,

    /// Backend plugin build, artifact and watch settings.
    pub backend: BackendConfig,

    /// Frontend asset settings (dev session and static serving).
    pub frontend: FrontendConfig,

    /// Request/response logging settings.
    pub logging: LoggingConfig,

    /// Metrics settings.
    pub observability: ObservabilityConfig,
}

/// Process mode. Selects the dev asset server and the change watcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    #[default]
    Development,
    Production,
}

impl Mode {
    pub fn is_development(self) -> bool {
        self == Mode::Development
    }
}

impl FromStr for Mode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "development" | "dev" => Ok(Mode::Development),
            "production" | "prod" => Ok(Mode::Production),
            other => Err(format!("unknown mode '{}'", other)),
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mode::Development => f.write_str("development"),
            Mode::Production => f.write_str("production"),
        }
    }
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Bind host (e.g., "0.0.0.0").
    pub host: String,

    /// Bind port.
    pub port: u16,

    /// Prefix every backend route is mounted under.
    pub api_prefix: String,

    /// Development or production.
    pub mode: Mode,
}

impl ServerConfig {
    /// `host:port` suitable for `TcpListener::bind`.
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 5000,
            api_prefix: "/api".to_string(),
            mode: Mode::Development,
        }
    }
}

/// Backend plugin configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct BackendConfig {
    /// Entry point handed to the build command (the backend crate manifest).
    pub entry: PathBuf,

    /// Name embedded in every artifact file name.
    pub name: String,

    /// Directory holding build artifacts.
    pub out_dir: PathBuf,

    /// Number of artifacts kept on disk after each successful rebuild.
    pub retain: usize,

    /// Program run to build the backend.
    pub build_program: String,

    /// Arguments; `{entry}` and `{out}` are substituted.
    pub build_args: Vec<String>,

    /// Library produced by the build command, copied into `out_dir`.
    pub build_output: PathBuf,

    /// Source watching.
    pub watch: WatchConfig,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            entry: PathBuf::from("backend/Cargo.toml"),
            name: "server".to_string(),
            out_dir: PathBuf::from("dist/backend"),
            retain: 2,
            build_program: "cargo".to_string(),
            build_args: vec![
                "build".to_string(),
                "--lib".to_string(),
                "--manifest-path".to_string(),
                "{entry}".to_string(),
            ],
            build_output: PathBuf::from(format!(
                "backend/target/debug/{}backend{}",
                std::env::consts::DLL_PREFIX,
                std::env::consts::DLL_SUFFIX
            )),
            watch: WatchConfig::default(),
        }
    }
}

/// Source watch configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct WatchConfig {
    /// Directories watched recursively.
    pub dirs: Vec<PathBuf>,

    /// Extension (without dot) of backend sources.
    pub extension: String,

    /// The host's own entry file; changes to it never trigger a rebuild.
    pub self_entry: PathBuf,

    /// Path components that are never actionable.
    pub ignore: Vec<String>,

    /// Settle window before a rebuild picks up pending changes.
    pub debounce_ms: u64,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            dirs: vec![PathBuf::from("backend/src"), PathBuf::from("shared")],
            extension: "rs".to_string(),
            self_entry: PathBuf::from("src/main.rs"),
            ignore: vec![
                "target".to_string(),
                ".git".to_string(),
                "node_modules".to_string(),
            ],
            debounce_ms: 50,
        }
    }
}

/// Frontend asset configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct FrontendConfig {
    /// Client source root served by the dev session.
    pub root: PathBuf,

    /// HTML entry template, relative to `root`.
    pub index: PathBuf,

    /// Client entry script referenced from the template. Served as-is, so
    /// it must be something the browser runs directly (plain ES modules).
    pub client_entry: String,

    /// Prebuilt asset directory served in production.
    pub static_dir: PathBuf,
}

impl FrontendConfig {
    pub fn index_path(&self) -> PathBuf {
        self.root.join(&self.index)
    }
}

impl Default for FrontendConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("client"),
            index: PathBuf::from("index.html"),
            client_entry: "/src/main.js".to_string(),
            static_dir: PathBuf::from("dist/public"),
        }
    }
}

/// API request logging configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Characters of the response body kept in a log line.
    pub response_snippet_chars: usize,

    /// Hard cap on a composed log line.
    pub max_line_chars: usize,

    /// Request bodies above this size are not captured.
    pub max_body_capture_bytes: usize,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            response_snippet_chars: 80,
            max_line_chars: 200,
            max_body_capture_bytes: 64 * 1024,
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            metrics_enabled: false,
            metrics_address: "127.0.0.1:9090".to_string(),
        }
    }
}
