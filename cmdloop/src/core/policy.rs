//! Allow-list policy for commands the loop may run without asking.

use crate::core::shell_text::{command_lines, program_name, simple_commands};

/// Builtins that never need approval. Reserved words such as `if` or `do`
/// are not programs; the command they introduce is checked instead.
const ALWAYS_ALLOWED: &[&str] = &["cd", "set", "export", "true"];

/// Program-name allow-list.
///
/// An entry ending in `/` (such as `./`) allows every program whose name
/// starts with it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandPolicy {
    allowed: Vec<String>,
}

impl CommandPolicy {
    pub fn new<I, S>(allowed: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            allowed: allowed.into_iter().map(Into::into).collect(),
        }
    }

    pub fn allowed(&self) -> &[String] {
        &self.allowed
    }

    pub fn is_allowed(&self, program: &str) -> bool {
        if ALWAYS_ALLOWED.contains(&program) {
            return true;
        }
        self.allowed.iter().any(|entry| {
            if entry.ends_with('/') {
                program.starts_with(entry.as_str())
            } else {
                entry == program
            }
        })
    }

    /// Programs in `block` that are not on the allow-list, deduplicated in
    /// order of first use.
    pub fn disallowed_programs(&self, block: &str) -> Vec<String> {
        let mut found: Vec<String> = Vec::new();
        for line in command_lines(block) {
            for command in simple_commands(line) {
                let Some(program) = program_name(command) else {
                    continue;
                };
                if !self.is_allowed(&program) && !found.contains(&program) {
                    found.push(program);
                }
            }
        }
        found
    }
}
