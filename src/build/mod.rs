//! Backend build subsystem.
//!
//! # Data Flow
//! ```text
//! entry (backend crate manifest)
//!     → artifact.rs (allocate a fresh, timestamp-named artifact path)
//!     → bundler.rs (run the build, place the library at that path)
//!     → [routing::loader opens it]
//!     → artifact.rs (record and prune: keep newest N)
//! ```
//!
//! # Design Decisions
//! - Every build gets a new file name; a path is never loaded twice
//! - Artifacts are immutable once written
//! - Build failures are values, never panics

pub mod artifact;
pub mod bundler;

use std::path::PathBuf;

use thiserror::Error;

pub use artifact::{ArtifactStore, BuildArtifact, CleanupError, PruneReport};
pub use bundler::{Bundler, CommandBundler};

/// Errors produced while building a backend artifact.
#[derive(Debug, Error)]
pub enum BuildError {
    /// The build program could not be started.
    #[error("failed to spawn build program '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// The build program ran and reported failure.
    #[error("build failed ({outcome}):\n{stderr}", outcome = exit_label(.status))]
    Compile { status: Option<i32>, stderr: String },

    /// The build reported success but produced nothing at the expected path.
    #[error("build output not found at {}", .0.display())]
    MissingOutput(PathBuf),

    /// Writing the artifact failed.
    #[error("artifact I/O error: {0}")]
    Io(#[from] std::io::Error),
}

fn exit_label(status: &Option<i32>) -> String {
    match status {
        Some(code) => format!("exit code {}", code),
        None => "terminated by signal".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = BuildError::Compile {
            status: Some(101),
            stderr: "error: expected `;`".to_string(),
        };
        let message = err.to_string();
        assert!(message.contains("exit code 101"));
        assert!(message.contains("expected `;`"));

        let err = BuildError::Compile { status: None, stderr: String::new() };
        assert!(err.to_string().contains("signal"));
    }
}
