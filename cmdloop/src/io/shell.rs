//! Shell execution of model-provided command blocks.
//!
//! The [`ShellRunner`] trait decouples the loop from the real shell. Tests use
//! scripted runners that return predetermined results without spawning
//! processes.

use std::path::PathBuf;
use std::process::Command;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{debug, info, instrument, warn};

use crate::io::process::run_command;

/// Parameters for one command block execution.
#[derive(Debug, Clone)]
pub struct ShellRequest {
    /// Working directory shared by every command in the block.
    pub workdir: PathBuf,
    /// Raw command block text.
    pub commands: String,
    /// `None` waits until the block finishes.
    pub timeout: Option<Duration>,
    /// Truncate captured stdout/stderr beyond this many bytes.
    pub output_limit_bytes: usize,
}

/// Result of one command block execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShellResult {
    pub exit_code: Option<i32>,
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
    pub timed_out: bool,
}

impl ShellResult {
    /// Text describing why the block failed, for the repair prompt.
    pub fn error_text(&self) -> String {
        if self.timed_out {
            return "command block timed out".to_string();
        }
        let stderr = self.stderr.trim();
        if !stderr.is_empty() {
            return stderr.to_string();
        }
        let stdout = self.stdout.trim();
        match self.exit_code {
            Some(code) if !stdout.is_empty() => format!("exit code {code}\n{stdout}"),
            Some(code) => format!("exit code {code} with no output"),
            None => "terminated by signal".to_string(),
        }
    }
}

/// Abstraction over shell backends.
pub trait ShellRunner {
    fn run(&self, request: &ShellRequest) -> Result<ShellResult>;
}

/// Runs a block as one `bash -e -o pipefail -c` invocation.
pub struct BashShell;

impl ShellRunner for BashShell {
    #[instrument(skip_all, fields(workdir = %request.workdir.display()))]
    fn run(&self, request: &ShellRequest) -> Result<ShellResult> {
        let script = adapt_sed_in_place(&request.commands, cfg!(target_os = "macos"));
        info!(lines = script.lines().count(), "running command block");

        let mut cmd = Command::new("bash");
        cmd.args(["-e", "-o", "pipefail", "-c"])
            .arg(&script)
            .current_dir(&request.workdir);
        let output = run_command(cmd, None, request.timeout, request.output_limit_bytes)
            .context("run bash")?;

        let result = ShellResult {
            exit_code: output.status.code(),
            success: output.success(),
            stdout: output.stdout_text(),
            stderr: output.stderr_text(),
            timed_out: output.timed_out,
        };
        if result.success {
            debug!("command block succeeded");
        } else {
            warn!(exit_code = ?result.exit_code, timed_out = result.timed_out, "command block failed");
        }
        Ok(result)
    }
}

/// BSD `sed` requires an explicit (possibly empty) backup suffix after `-i`.
pub fn adapt_sed_in_place(commands: &str, bsd_sed: bool) -> String {
    if bsd_sed {
        commands.replace("sed -i ", "sed -i '' ")
    } else {
        commands.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn request(workdir: &std::path::Path, commands: &str) -> ShellRequest {
        ShellRequest {
            workdir: workdir.to_path_buf(),
            commands: commands.to_string(),
            timeout: Some(Duration::from_secs(30)),
            output_limit_bytes: 10_000,
        }
    }

    #[test]
    fn runs_in_workdir() {
        let temp = tempfile::tempdir().expect("tempdir");
        let result = BashShell
            .run(&request(temp.path(), "touch made.txt\necho ok"))
            .expect("run");
        assert!(result.success);
        assert_eq!(result.stdout, "ok\n");
        assert!(temp.path().join("made.txt").is_file());
    }

    #[test]
    fn stops_at_first_failing_command() {
        let temp = tempfile::tempdir().expect("tempdir");
        let result = BashShell
            .run(&request(temp.path(), "false\ntouch never.txt"))
            .expect("run");
        assert!(!result.success);
        assert_eq!(result.exit_code, Some(1));
        assert!(!temp.path().join("never.txt").exists());
    }

    #[test]
    fn heredoc_writes_file() {
        let temp = tempfile::tempdir().expect("tempdir");
        let block = "cat <<'EOF' > note.md\n# Title\n$HOME stays literal\nEOF";
        let result = BashShell.run(&request(temp.path(), block)).expect("run");
        assert!(result.success);
        let written = fs::read_to_string(temp.path().join("note.md")).expect("read");
        assert_eq!(written, "# Title\n$HOME stays literal\n");
    }

    #[test]
    fn error_text_prefers_stderr() {
        let result = ShellResult {
            exit_code: Some(2),
            success: false,
            stdout: "partial".to_string(),
            stderr: "sed: can't read x.txt\n".to_string(),
            timed_out: false,
        };
        assert_eq!(result.error_text(), "sed: can't read x.txt");

        let quiet = ShellResult {
            stderr: String::new(),
            stdout: String::new(),
            ..result
        };
        assert_eq!(quiet.error_text(), "exit code 2 with no output");
    }

    #[test]
    fn bsd_sed_gets_empty_backup_suffix() {
        assert_eq!(
            adapt_sed_in_place("sed -i 's/a/b/' f.txt", true),
            "sed -i '' 's/a/b/' f.txt"
        );
        assert_eq!(
            adapt_sed_in_place("sed -i 's/a/b/' f.txt", false),
            "sed -i 's/a/b/' f.txt"
        );
    }
}
