//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (startup.rs):
//!     Initial build + load → frontend (dev session | static) → watcher → serve
//!
//! Shutdown (shutdown.rs):
//!     Signal received → stop accepting → stop rebuild loop → close dev session
//!
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → Trigger graceful shutdown
//! ```
//!
//! # Design Decisions
//! - Ordered startup: backend first, then frontend, then listeners
//! - A failed initial build aborts startup; later failures never do

pub mod shutdown;
pub mod signals;
pub mod startup;

pub use shutdown::Shutdown;
pub use signals::shutdown_signal;
pub use startup::{bind, App, StartupError};
