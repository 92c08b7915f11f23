//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (Axum setup, middleware stack)
//!     → request.rs (assign x-request-id)
//!     → middleware/request_log.rs (API requests only)
//!     → API prefix → live route table
//!     → anything else → frontend router
//!     → response.rs (opaque 500s for failures and panics)
//! ```

pub mod middleware;
pub mod request;
pub mod response;
pub mod server;

pub use request::{request_id, MakeRequestUuid, X_REQUEST_ID};
pub use response::{error_chain, internal_error};
pub use server::HttpServer;
