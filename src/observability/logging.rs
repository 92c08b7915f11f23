//! Structured logging.
//!
//! # Responsibilities
//! - Install the global tracing subscriber
//! - Honour `RUST_LOG`, falling back to the configured level
//!
//! # Design Decisions
//! - Uses tracing crate for structured logging
//! - Installing twice is harmless so tests and embedders can call it freely

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Filter used when `RUST_LOG` is unset: `level` for this crate and
/// `tower_http`, `warn` for everything else.
pub fn default_filter(level: &str) -> String {
    format!("warn,hotroute={level},tower_http={level}")
}

/// Install the subscriber. Returns false if one was already installed.
pub fn init(level: &str) -> bool {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| default_filter(level).into());

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .try_init()
        .is_ok()
}
