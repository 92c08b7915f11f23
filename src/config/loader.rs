//! Configuration loading from disk and the process environment.

use std::fs;
use std::path::Path;

use crate::config::schema::{HotrouteConfig, Mode};
use crate::config::validation::{validate_config, ValidationError};

/// Environment variable overriding `server.port`.
pub const ENV_PORT: &str = "PORT";
/// Environment variable overriding `server.mode`.
pub const ENV_MODE: &str = "HOTROUTE_MODE";

/// Error type for configuration loading.
#[derive(Debug)]
pub enum ConfigError {
    Io(std::io::Error),
    Parse(toml::de::Error),
    Env { var: &'static str, message: String },
    Validation(Vec<ValidationError>),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "IO error: {}", e),
            ConfigError::Parse(e) => write!(f, "Parse error: {}", e),
            ConfigError::Env { var, message } => write!(f, "Invalid {}: {}", var, message),
            ConfigError::Validation(errors) => {
                write!(f, "Validation failed: ")?;
                for (i, err) in errors.iter().enumerate() {
                    if i > 0 { write!(f, ", ")?; }
                    write!(f, "{}", err)?;
                }
                Ok(())
            }
        }
    }
}

impl std::error::Error for ConfigError {}

/// Load and validate configuration from a TOML file.
pub fn load_config(path: &Path) -> Result<HotrouteConfig, ConfigError> {
    let content = fs::read_to_string(path).map_err(ConfigError::Io)?;
    let config: HotrouteConfig = toml::from_str(&content).map_err(ConfigError::Parse)?;

    validate_config(&config).map_err(ConfigError::Validation)?;

    Ok(config)
}

/// Apply `PORT` and `HOTROUTE_MODE` from the process environment.
pub fn apply_env(config: &mut HotrouteConfig) -> Result<(), ConfigError> {
    apply_overrides(
        config,
        std::env::var(ENV_PORT).ok().as_deref(),
        std::env::var(ENV_MODE).ok().as_deref(),
    )
}

fn apply_overrides(
    config: &mut HotrouteConfig,
    port: Option<&str>,
    mode: Option<&str>,
) -> Result<(), ConfigError> {
    if let Some(port) = port.filter(|p| !p.trim().is_empty()) {
        config.server.port = port.trim().parse().map_err(|e| ConfigError::Env {
            var: ENV_PORT,
            message: format!("{}", e),
        })?;
    }

    if let Some(mode) = mode.filter(|m| !m.trim().is_empty()) {
        config.server.mode = mode
            .parse::<Mode>()
            .map_err(|message| ConfigError::Env { var: ENV_MODE, message })?;
    }

    Ok(())
}
