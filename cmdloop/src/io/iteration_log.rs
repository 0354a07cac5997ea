//! Per-iteration logs under `.cmdloop/iterations/<run-id>/<iter>/`.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Serialize;

use crate::core::types::{AttemptOutcome, LoopState};
use crate::io::atomic::write_atomic;
use crate::io::init::AgentPaths;
use crate::io::shell::ShellResult;

#[derive(Debug, Clone, Serialize)]
pub struct IterationMeta {
    pub run_id: String,
    pub iter: u32,
    pub backend: String,
    pub state: LoopState,
    pub strategy: Option<String>,
    pub outcome: Option<AttemptOutcome>,
    pub changed_paths: Vec<String>,
    pub started_at: String,
    pub ended_at: String,
    pub duration_ms: u64,
}

#[derive(Debug, Clone)]
pub struct IterationPaths {
    pub dir: PathBuf,
    pub meta_path: PathBuf,
    pub prompt_path: PathBuf,
    pub reply_path: PathBuf,
    pub shell_log_path: PathBuf,
}

impl IterationPaths {
    pub fn new(paths: &AgentPaths, run_id: &str, iter: u32) -> Self {
        let dir = paths.iterations_dir.join(run_id).join(iter.to_string());
        Self {
            meta_path: dir.join("meta.json"),
            prompt_path: dir.join("prompt.md"),
            reply_path: dir.join("reply.md"),
            shell_log_path: dir.join("shell.log"),
            dir,
        }
    }
}

pub struct IterationWriteRequest<'a> {
    pub paths: &'a AgentPaths,
    pub meta: &'a IterationMeta,
    pub prompt: &'a str,
    pub reply: Option<&'a str>,
    pub commands: Option<&'a str>,
    pub shell: Option<&'a ShellResult>,
}

pub fn write_iteration(request: &IterationWriteRequest<'_>) -> Result<IterationPaths> {
    let paths = IterationPaths::new(request.paths, &request.meta.run_id, request.meta.iter);
    fs::create_dir_all(&paths.dir)
        .with_context(|| format!("create iteration dir {}", paths.dir.display()))?;

    write_text(&paths.prompt_path, request.prompt)?;
    if let Some(reply) = request.reply {
        write_text(&paths.reply_path, reply)?;
    }
    if let Some(commands) = request.commands {
        write_text(
            &paths.shell_log_path,
            &format_shell_log(commands, request.shell),
        )?;
    }
    let mut meta = serde_json::to_string_pretty(request.meta)?;
    meta.push('\n');
    write_text(&paths.meta_path, &meta)?;

    Ok(paths)
}

fn format_shell_log(commands: &str, shell: Option<&ShellResult>) -> String {
    let mut buf = String::new();
    buf.push_str("$ commands\n");
    buf.push_str(commands.trim_end());
    buf.push('\n');
    match shell {
        Some(result) => {
            buf.push_str(&format!(
                "\n$ exit {}{}\n",
                result
                    .exit_code
                    .map_or_else(|| "signal".to_string(), |c| c.to_string()),
                if result.timed_out { " (timed out)" } else { "" }
            ));
            if !result.stdout.is_empty() {
                buf.push_str("\n$ stdout\n");
                buf.push_str(&result.stdout);
            }
            if !result.stderr.is_empty() {
                buf.push_str("\n$ stderr\n");
                buf.push_str(&result.stderr);
            }
        }
        None => buf.push_str("\n$ not executed\n"),
    }
    buf
}

/// Keep the raw text of a reply that had neither commands nor a completion
/// marker.
pub fn save_bad_reply(paths: &AgentPaths, reply: &str) -> Result<PathBuf> {
    write_atomic(&paths.bad_reply_path, reply)?;
    Ok(paths.bad_reply_path.clone())
}

fn write_text(path: &Path, contents: &str) -> Result<()> {
    fs::write(path, contents).with_context(|| format!("write {}", path.display()))
}
