//! Axum middleware.

pub mod request_log;

pub use request_log::{compose_log_line, log_api_requests, ApiLogRecord, ApiLogState};
