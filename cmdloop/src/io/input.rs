//! Reading the task text from the command line, a file, or stdin.

use std::fs;
use std::io::{self, BufRead, IsTerminal, Write};
use std::path::Path;

use anyhow::{Context, Result, bail};

/// Consecutive empty lines that end interactive task entry.
const END_BLANK_LINES: usize = 3;

/// Where the task text comes from.
#[derive(Debug, Clone, Copy)]
pub enum TaskInput<'a> {
    Text(&'a str),
    File(&'a Path),
    Stdin,
}

pub fn read_task(input: TaskInput<'_>) -> Result<String> {
    let text = match input {
        TaskInput::Text(text) => text.to_string(),
        TaskInput::File(path) => {
            fs::read_to_string(path).with_context(|| format!("read task {}", path.display()))?
        }
        TaskInput::Stdin => {
            let stdin = io::stdin();
            if stdin.is_terminal() {
                let mut stdout = io::stdout();
                writeln!(
                    stdout,
                    "Describe the task (paste error logs too). Finish with {END_BLANK_LINES} empty lines or Ctrl-D:"
                )?;
                stdout.flush()?;
            }
            read_until_blank_lines(stdin.lock())?
        }
    };
    if text.trim().is_empty() {
        bail!("task is empty");
    }
    Ok(text)
}

/// Read lines until `END_BLANK_LINES` consecutive empty lines or EOF.
/// Blank lines inside the text are kept.
fn read_until_blank_lines<R: BufRead>(reader: R) -> Result<String> {
    let mut lines = Vec::new();
    let mut blank_run = 0;
    for line in reader.lines() {
        let line = line.context("read task from stdin")?;
        if line.trim().is_empty() {
            blank_run += 1;
            if blank_run >= END_BLANK_LINES {
                break;
            }
        } else {
            blank_run = 0;
        }
        lines.push(line);
    }
    Ok(lines.join("\n").trim().to_string())
}
