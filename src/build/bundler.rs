//! Backend bundling.
//!
//! # Responsibilities
//! - Turn one entry point into one self-contained artifact at a given path
//! - Report compiler failures as `BuildError` values
//!
//! # Design Decisions
//! - The build is an external command; hotroute never links the backend itself
//! - The build writes to its own target directory; the result is copied to the
//!   artifact path so every generation is a distinct file
//! - The child process is killed if the build future is dropped

use std::future::Future;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use tokio::process::Command;

use crate::build::BuildError;
use crate::config::BackendConfig;

/// Lines of compiler stderr kept in a `BuildError::Compile`.
const STDERR_TAIL_LINES: usize = 40;

/// Compiles an entry point into a loadable artifact.
pub trait Bundler: Send + Sync + 'static {
    /// Build `entry` and write the result to `out`.
    fn bundle(
        &self,
        entry: &Path,
        out: &Path,
    ) -> impl Future<Output = Result<(), BuildError>> + Send;
}

/// Runs a build command (by default `cargo build --lib`) and copies the
/// produced library to the artifact path.
#[derive(Debug, Clone)]
pub struct CommandBundler {
    program: String,
    args: Vec<String>,
    output: PathBuf,
    working_dir: Option<PathBuf>,
}

impl CommandBundler {
    /// `args` may contain `{entry}` and `{out}` placeholders.
    pub fn new(program: impl Into<String>, args: Vec<String>, output: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args,
            output: output.into(),
            working_dir: None,
        }
    }

    pub fn from_config(config: &BackendConfig) -> Self {
        Self::new(
            config.build_program.clone(),
            config.build_args.clone(),
            config.build_output.clone(),
        )
    }

    /// Run the build command from `dir` instead of the process directory.
    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    fn expand_args(&self, entry: &Path, out: &Path) -> Vec<String> {
        let entry = entry.to_string_lossy();
        let out = out.to_string_lossy();
        self.args
            .iter()
            .map(|arg| arg.replace("{entry}", &entry).replace("{out}", &out))
            .collect()
    }
}

impl Bundler for CommandBundler {
    async fn bundle(&self, entry: &Path, out: &Path) -> Result<(), BuildError> {
        let args = self.expand_args(entry, out);
        tracing::debug!(program = %self.program, ?args, "Running build command");

        let mut command = Command::new(&self.program);
        command
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &self.working_dir {
            command.current_dir(dir);
        }

        let output = command.output().await.map_err(|source| BuildError::Spawn {
            program: self.program.clone(),
            source,
        })?;

        if !output.status.success() {
            return Err(BuildError::Compile {
                status: output.status.code(),
                stderr: tail(&String::from_utf8_lossy(&output.stderr), STDERR_TAIL_LINES),
            });
        }

        let produced = match &self.working_dir {
            Some(dir) if self.output.is_relative() => dir.join(&self.output),
            _ => self.output.clone(),
        };
        if !tokio::fs::try_exists(&produced).await.unwrap_or(false) {
            return Err(BuildError::MissingOutput(produced));
        }

        if let Some(parent) = out.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::copy(&produced, out).await?;
        Ok(())
    }
}

fn tail(text: &str, lines: usize) -> String {
    let all: Vec<&str> = text.lines().collect();
    let start = all.len().saturating_sub(lines);
    all[start..].join("\n")
}
