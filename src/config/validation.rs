//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (retain > 0, ports valid)
//! - Check mode-dependent requirements (watch dirs in development)
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: HotrouteConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::fmt;

use crate::config::schema::HotrouteConfig;

/// A single semantic problem in a configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// Dotted path of the offending field.
    pub field: &'static str,
    pub message: String,
}

impl ValidationError {
    fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Validate a configuration, collecting every problem.
pub fn validate_config(config: &HotrouteConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.server.port == 0 {
        errors.push(ValidationError::new("server.port", "must be non-zero"));
    }

    let prefix = &config.server.api_prefix;
    if !prefix.starts_with('/') {
        errors.push(ValidationError::new("server.api_prefix", "must start with '/'"));
    } else if prefix.trim_end_matches('/').is_empty() {
        errors.push(ValidationError::new(
            "server.api_prefix",
            "cannot be the root path",
        ));
    }

    if config.backend.retain == 0 {
        errors.push(ValidationError::new(
            "backend.retain",
            "must keep at least the live artifact",
        ));
    }

    if config.backend.name.is_empty() || config.backend.name.contains(['/', '\\']) {
        errors.push(ValidationError::new(
            "backend.name",
            "must be a non-empty file name",
        ));
    }

    if config.backend.build_program.trim().is_empty() {
        errors.push(ValidationError::new("backend.build_program", "must not be empty"));
    }

    if config.backend.watch.extension.trim_start_matches('.').is_empty() {
        errors.push(ValidationError::new("backend.watch.extension", "must not be empty"));
    }

    if config.server.mode.is_development() {
        if config.backend.watch.dirs.is_empty() {
            errors.push(ValidationError::new(
                "backend.watch.dirs",
                "development mode needs at least one watched directory",
            ));
        }
        if config.frontend.client_entry.is_empty() {
            errors.push(ValidationError::new("frontend.client_entry", "must not be empty"));
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
