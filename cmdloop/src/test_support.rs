//! Scripted collaborators and fixtures for unit and integration tests.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::fs;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use anyhow::Result;
use tempfile::TempDir;

use crate::io::approver::Approver;
use crate::io::backend::{BackendError, ModelBackend};
use crate::io::context::{ContextSource, MissingContextError};
use crate::io::shell::{ShellRequest, ShellResult, ShellRunner};

/// Backend that returns queued results in order and records every prompt.
pub struct ScriptedBackend {
    name: String,
    script: RefCell<VecDeque<Result<String, BackendError>>>,
    prompts: Rc<RefCell<Vec<String>>>,
}

impl ScriptedBackend {
    pub fn new(name: &str, script: Vec<Result<String, BackendError>>) -> Self {
        Self {
            name: name.to_string(),
            script: RefCell::new(script.into()),
            prompts: Rc::new(RefCell::new(Vec::new())),
        }
    }

    /// Backend whose every request succeeds with the next reply.
    pub fn replies<'a>(name: &str, replies: impl IntoIterator<Item = &'a str>) -> Self {
        Self::new(name, replies.into_iter().map(|r| Ok(r.to_string())).collect())
    }

    /// Shared handle to the prompts received so far.
    pub fn prompts(&self) -> Rc<RefCell<Vec<String>>> {
        Rc::clone(&self.prompts)
    }
}

impl ModelBackend for ScriptedBackend {
    fn name(&self) -> &str {
        &self.name
    }

    fn generate(&self, prompt: &str) -> Result<String, BackendError> {
        self.prompts.borrow_mut().push(prompt.to_string());
        self.script
            .borrow_mut()
            .pop_front()
            .unwrap_or_else(|| {
                Err(BackendError::Malformed {
                    backend: self.name.clone(),
                    message: "script exhausted".to_string(),
                })
            })
    }
}

/// One scripted shell execution: files to write, then the result to report.
#[derive(Debug, Clone)]
pub struct ScriptedStep {
    pub writes: Vec<(PathBuf, String)>,
    pub result: ShellResult,
}

impl ScriptedStep {
    pub fn ok() -> Self {
        Self {
            writes: Vec::new(),
            result: ShellResult {
                exit_code: Some(0),
                success: true,
                stdout: String::new(),
                stderr: String::new(),
                timed_out: false,
            },
        }
    }

    pub fn fail(exit_code: i32, stderr: &str) -> Self {
        Self {
            writes: Vec::new(),
            result: ShellResult {
                exit_code: Some(exit_code),
                success: false,
                stdout: String::new(),
                stderr: stderr.to_string(),
                timed_out: false,
            },
        }
    }

    /// Write `contents` to `path` (relative to the workdir) when the step runs.
    pub fn writing(mut self, path: impl Into<PathBuf>, contents: &str) -> Self {
        self.writes.push((path.into(), contents.to_string()));
        self
    }
}

/// Shell that replays scripted steps and records the command blocks it got.
pub struct ScriptedShell {
    steps: RefCell<VecDeque<ScriptedStep>>,
    blocks: Rc<RefCell<Vec<String>>>,
}

impl ScriptedShell {
    pub fn new(steps: Vec<ScriptedStep>) -> Self {
        Self {
            steps: RefCell::new(steps.into()),
            blocks: Rc::new(RefCell::new(Vec::new())),
        }
    }

    pub fn blocks(&self) -> Rc<RefCell<Vec<String>>> {
        Rc::clone(&self.blocks)
    }
}

impl ShellRunner for ScriptedShell {
    fn run(&self, request: &ShellRequest) -> Result<ShellResult> {
        self.blocks.borrow_mut().push(request.commands.clone());
        let step = self
            .steps
            .borrow_mut()
            .pop_front()
            .unwrap_or_else(ScriptedStep::ok);
        for (path, contents) in &step.writes {
            let target = request.workdir.join(path);
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::write(target, contents)?;
        }
        Ok(step.result)
    }
}

/// Context source returning fixed text, or failing like a broken dumper.
pub struct StaticContext {
    contents: Option<String>,
    refreshes: Cell<usize>,
}

impl StaticContext {
    pub fn new(contents: &str) -> Self {
        Self {
            contents: Some(contents.to_string()),
            refreshes: Cell::new(0),
        }
    }

    pub fn missing() -> Self {
        Self {
            contents: None,
            refreshes: Cell::new(0),
        }
    }

    pub fn refreshes(&self) -> usize {
        self.refreshes.get()
    }
}

impl ContextSource for StaticContext {
    fn refresh(&self) -> Result<String> {
        self.refreshes.set(self.refreshes.get() + 1);
        match &self.contents {
            Some(contents) => Ok(contents.clone()),
            None => Err(MissingContextError {
                reason: "context file was not produced".to_string(),
            }
            .into()),
        }
    }
}

/// Approver with a fixed answer that counts how often it was asked.
pub struct AutoApprover {
    answer: bool,
    asked: Cell<usize>,
}

impl AutoApprover {
    pub fn allow() -> Self {
        Self {
            answer: true,
            asked: Cell::new(0),
        }
    }

    pub fn deny() -> Self {
        Self {
            answer: false,
            asked: Cell::new(0),
        }
    }

    pub fn asked(&self) -> usize {
        self.asked.get()
    }
}

impl Approver for AutoApprover {
    fn approve(&self, _commands: &str, _disallowed: &[String]) -> Result<bool> {
        self.asked.set(self.asked.get() + 1);
        Ok(self.answer)
    }
}

/// Temporary project directory.
pub struct TestWorkspace {
    temp: TempDir,
}

impl TestWorkspace {
    pub fn new() -> Result<Self> {
        Ok(Self {
            temp: tempfile::tempdir()?,
        })
    }

    pub fn path(&self) -> &Path {
        self.temp.path()
    }

    pub fn write(&self, relative: &str, contents: &str) -> Result<PathBuf> {
        let path = self.temp.path().join(relative);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, contents)?;
        Ok(path)
    }

    pub fn read(&self, relative: &str) -> Result<String> {
        Ok(fs::read_to_string(self.temp.path().join(relative))?)
    }
}
