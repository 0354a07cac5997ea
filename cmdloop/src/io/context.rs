//! Project context collaborator.
//!
//! The context is a serialized snapshot of the project (file tree plus file
//! contents) produced by an external dumper. The loop's only contract with it
//! is: after invocation the context file exists and is non-empty, otherwise the
//! run aborts.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use anyhow::{Context, Result};
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use crate::io::process::run_command;

/// The context could not be produced. Fatal to the run.
#[derive(Debug, Error)]
#[error("project context unavailable: {reason}")]
pub struct MissingContextError {
    pub reason: String,
}

impl MissingContextError {
    fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

/// Source of serialized project context.
pub trait ContextSource {
    /// Regenerate and return the current project context.
    fn refresh(&self) -> Result<String>;
}

/// Runs an external dumper command and reads the file it writes.
#[derive(Debug, Clone)]
pub struct CommandContext {
    workdir: PathBuf,
    command: Vec<String>,
    file: PathBuf,
    output_limit_bytes: usize,
}

impl CommandContext {
    pub fn new(
        workdir: impl Into<PathBuf>,
        command: Vec<String>,
        file: impl AsRef<Path>,
        output_limit_bytes: usize,
    ) -> Self {
        let workdir = workdir.into();
        let file = workdir.join(file.as_ref());
        Self {
            workdir,
            command,
            file,
            output_limit_bytes,
        }
    }
}

impl ContextSource for CommandContext {
    #[instrument(skip_all, fields(file = %self.file.display()))]
    fn refresh(&self) -> Result<String> {
        info!("refreshing project context");
        let Some((program, args)) = self.command.split_first() else {
            return Err(MissingContextError::new("context command is empty").into());
        };

        if self.file.exists() {
            fs::remove_file(&self.file)
                .with_context(|| format!("remove stale context {}", self.file.display()))?;
        }

        let mut cmd = Command::new(program);
        cmd.args(args).current_dir(&self.workdir);
        let output = match run_command(cmd, None, None, self.output_limit_bytes) {
            Ok(output) => output,
            Err(err) => {
                return Err(MissingContextError::new(format!("run {program}: {err:#}")).into());
            }
        };
        if !output.success() {
            warn!(exit_code = ?output.status.code(), "context command failed");
            return Err(MissingContextError::new(format!(
                "{program} exited with {:?}: {}",
                output.status.code(),
                output.stderr_text().trim()
            ))
            .into());
        }

        let contents = match fs::read_to_string(&self.file) {
            Ok(contents) => contents,
            Err(err) => {
                return Err(MissingContextError::new(format!(
                    "read {}: {err}",
                    self.file.display()
                ))
                .into());
            }
        };
        if contents.trim().is_empty() {
            return Err(
                MissingContextError::new(format!("{} is empty", self.file.display())).into(),
            );
        }

        debug!(chars = contents.chars().count(), "context refreshed");
        Ok(contents)
    }
}
