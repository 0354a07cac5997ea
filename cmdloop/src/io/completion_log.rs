//! Persisted history of completed goals (`.cmdloop/history.json`).
//!
//! The document is always read and rewritten whole; entries are stored most
//! recent first.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::core::types::CompletionEntry;
use crate::io::atomic::write_atomic;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletionLog {
    #[serde(default)]
    pub completions: Vec<CompletionEntry>,
}

/// Load the history. A missing file is an empty history.
pub fn load_completions(path: &Path) -> Result<CompletionLog> {
    if !path.exists() {
        return Ok(CompletionLog::default());
    }
    let contents =
        fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    if contents.trim().is_empty() {
        return Ok(CompletionLog::default());
    }
    serde_json::from_str(&contents).with_context(|| format!("parse {}", path.display()))
}

fn write_completions(path: &Path, log: &CompletionLog) -> Result<()> {
    let mut buf = serde_json::to_string_pretty(log).context("serialize completion history")?;
    buf.push('\n');
    write_atomic(path, &buf)
}

/// Put `entry` at the front of the persisted history.
pub fn prepend_completion(path: &Path, entry: CompletionEntry) -> Result<()> {
    let mut log = load_completions(path)?;
    log.completions.insert(0, entry);
    debug!(entries = log.completions.len(), "saving completion history");
    write_completions(path, &log)
}

/// Drop everything and keep only `entry`.
pub fn replace_completions(path: &Path, entry: CompletionEntry) -> Result<()> {
    write_completions(
        path,
        &CompletionLog {
            completions: vec![entry],
        },
    )
}

pub fn clear_completions(path: &Path) -> Result<()> {
    write_completions(path, &CompletionLog::default())
}
