//! Operator approval for command blocks that use programs outside the
//! allow-list.

use std::io::{self, BufRead, IsTerminal, Write};

use anyhow::{Context, Result};
use tracing::warn;

pub trait Approver {
    /// Return true to run `commands` despite `disallowed` programs.
    fn approve(&self, commands: &str, disallowed: &[String]) -> Result<bool>;
}

/// Asks y/N on the terminal. Denies when stdin is not interactive.
pub struct TerminalApprover;

impl Approver for TerminalApprover {
    fn approve(&self, commands: &str, disallowed: &[String]) -> Result<bool> {
        if !io::stdin().is_terminal() {
            warn!(programs = ?disallowed, "stdin is not a terminal; denying command block");
            return Ok(false);
        }

        let mut stdout = io::stdout();
        writeln!(
            stdout,
            "\nThe model wants to run programs outside the allow-list: {}",
            disallowed.join(", ")
        )?;
        writeln!(stdout, "```bash\n{}\n```", commands.trim())?;
        write!(stdout, "run this block? [y/N]: ")?;
        stdout.flush()?;

        let mut answer = String::new();
        io::stdin()
            .lock()
            .read_line(&mut answer)
            .context("read approval answer")?;
        Ok(is_yes(&answer))
    }
}

fn is_yes(answer: &str) -> bool {
    matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_explicit_yes_approves() {
        assert!(is_yes("y\n"));
        assert!(is_yes(" YES "));
        assert!(!is_yes("\n"));
        assert!(!is_yes("n"));
        assert!(!is_yes("yep"));
    }
}
