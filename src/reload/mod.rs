//! Live backend reload subsystem.
//!
//! # Data Flow
//! ```text
//! Source change under a watched directory
//!     → watcher.rs (classify: actionable / self change / ignored)
//!     → mpsc channel
//!     → pipeline.rs (debounce, coalesce, serialise)
//!         → Bundler::bundle      (fresh artifact)
//!         → ModuleLoader::load   (new generation)
//!         → RouteTable::build    (in isolation)
//!         → LiveRoutes::swap     (atomic publish)
//!         → ArtifactStore prune  (keep the newest few)
//! ```
//!
//! # Design Decisions
//! - At most one rebuild runs at a time; events arriving meanwhile fold into
//!   the next one
//! - Failures are logged and the server keeps serving the last good table
//! - Only active in development mode

pub mod pipeline;
pub mod watcher;

pub use pipeline::{RebuildError, RebuildPipeline, RebuildReport};
pub use watcher::{ChangeClass, ChangeEvent, ChangeFilter, ChangeKind, ChangeWatcher};
