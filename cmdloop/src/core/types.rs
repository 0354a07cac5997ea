//! Shared deterministic types for the agent loop.
//!
//! These types define stable contracts between the loop, prompt rendering, and
//! persisted logs. They must not depend on external state or I/O.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Where the loop currently is within one iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoopState {
    /// A prompt is ready and the loop waits for the model reply.
    AwaitingModel,
    /// The reply carried a command block that has not run yet.
    GotCommands,
    /// The command block is executing.
    Applying,
    /// The model declared the task complete.
    Done,
    /// The loop stopped without completion (malformed reply or iteration cap).
    FailedLimit,
}

impl LoopState {
    pub fn as_str(self) -> &'static str {
        match self {
            LoopState::AwaitingModel => "awaiting_model",
            LoopState::GotCommands => "got_commands",
            LoopState::Applying => "applying",
            LoopState::Done => "done",
            LoopState::FailedLimit => "failed_limit",
        }
    }
}

impl fmt::Display for LoopState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of one applied command block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttemptOutcome {
    Success,
    Failure,
}

/// One entry of the append-only attempt history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttemptRecord {
    /// Human-readable description of what the commands tried to do.
    pub strategy: String,
    pub outcome: AttemptOutcome,
    /// Error text, set only for failures.
    pub error: Option<String>,
}

impl AttemptRecord {
    pub fn success(strategy: impl Into<String>) -> Self {
        Self {
            strategy: strategy.into(),
            outcome: AttemptOutcome::Success,
            error: None,
        }
    }

    pub fn failure(strategy: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            strategy: strategy.into(),
            outcome: AttemptOutcome::Failure,
            error: Some(error.into()),
        }
    }

    pub fn is_success(&self) -> bool {
        self.outcome == AttemptOutcome::Success
    }
}

/// Ordered attempt history for one run. Entries can only be appended.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AttemptHistory {
    records: Vec<AttemptRecord>,
}

impl AttemptHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, record: AttemptRecord) {
        self.records.push(record);
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn last(&self) -> Option<&AttemptRecord> {
        self.records.last()
    }

    pub fn records(&self) -> &[AttemptRecord] {
        &self.records
    }

    /// Strategies of successful attempts, oldest first.
    pub fn successful_strategies(&self) -> Vec<&str> {
        self.records
            .iter()
            .filter(|r| r.is_success())
            .map(|r| r.strategy.as_str())
            .collect()
    }
}

/// A persisted `{goal, summary}` record of a completed run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletionEntry {
    pub goal: String,
    pub summary: String,
}
