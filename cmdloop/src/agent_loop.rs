//! The request → parse → execute → re-prompt loop behind `cmdloop run`.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use chrono::Utc;
use tracing::{debug, info, instrument, warn};

use crate::core::change::{StepVerdict, changed_paths, classify_step};
use crate::core::policy::CommandPolicy;
use crate::core::reply::{Reply, classify_reply};
use crate::core::shell_text::{focus_file_candidates, watched_paths};
use crate::core::task::Task;
use crate::core::types::{
    AttemptHistory, AttemptOutcome, AttemptRecord, CompletionEntry, LoopState,
};
use crate::io::approver::Approver;
use crate::io::completion_log::{load_completions, prepend_completion, replace_completions};
use crate::io::config::AgentConfig;
use crate::io::context::ContextSource;
use crate::io::fingerprint::snapshot;
use crate::io::init::AgentPaths;
use crate::io::iteration_log::{
    IterationMeta, IterationWriteRequest, save_bad_reply, write_iteration,
};
use crate::io::prompt::{FailedStep, FocusFile, PromptBuilder};
use crate::io::shell::{ShellRequest, ShellResult, ShellRunner};
use crate::session::BackendSession;

/// How completion history is used by a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    /// Start fresh; prepend the entry on success.
    Normal,
    /// Show recent completions as context; on success keep only this entry.
    Fix,
}

/// Loop settings derived from [`AgentConfig`].
#[derive(Debug, Clone)]
pub struct LoopConfig {
    pub max_iterations: u32,
    pub completion_marker: String,
    pub policy: CommandPolicy,
    pub shell_timeout: Option<Duration>,
    pub output_limit_bytes: usize,
}

impl LoopConfig {
    pub fn from_agent_config(cfg: &AgentConfig) -> Self {
        Self {
            max_iterations: cfg.max_iterations,
            completion_marker: cfg.completion_marker.clone(),
            policy: CommandPolicy::new(cfg.allowed_commands.iter().cloned()),
            shell_timeout: cfg.shell_timeout(),
            output_limit_bytes: cfg.output_limit_bytes,
        }
    }
}

/// The collaborators one run talks to.
pub struct Collaborators<'a, S, C, A> {
    pub session: &'a mut BackendSession,
    pub shell: &'a S,
    pub context: &'a C,
    pub approver: &'a A,
}

/// Reason why `run_agent` stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoopStop {
    /// The model replied with the completion marker.
    Done {
        manual: Option<String>,
        summary: Option<String>,
        /// Whether a completion entry was written to history.
        saved: bool,
    },
    /// The reply had neither commands nor the completion marker.
    Malformed { reply: String, saved_to: PathBuf },
    /// `max_iterations` replies were processed without completion.
    IterationLimit { max_iterations: u32 },
}

/// Summary of a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoopOutcome {
    pub run_id: String,
    pub iterations: u32,
    pub attempts: AttemptHistory,
    pub stop: LoopStop,
}

/// What happened in one iteration, reported to the caller as it happens.
#[derive(Debug, Clone)]
pub struct IterationReport<'a> {
    pub iter: u32,
    pub max_iterations: u32,
    pub backend: &'a str,
    pub reply: &'a str,
    pub state: LoopState,
    pub commands: Option<&'a str>,
    pub record: Option<&'a AttemptRecord>,
}

/// Run the agent loop until completion, a malformed reply, or the iteration cap.
///
/// Backend errors that survive fallback, a missing context and I/O failures
/// abort the run with an error. Shell failures never do; they are reported
/// back to the model.
#[instrument(skip_all, fields(root = %root.display(), mode = ?mode))]
pub fn run_agent<S, C, A, F>(
    root: &Path,
    task: &Task,
    mode: RunMode,
    deps: Collaborators<'_, S, C, A>,
    config: &LoopConfig,
    mut on_iteration: F,
) -> Result<LoopOutcome>
where
    S: ShellRunner,
    C: ContextSource,
    A: Approver,
    F: FnMut(&IterationReport<'_>),
{
    let Collaborators {
        session,
        shell,
        context,
        approver,
    } = deps;
    let paths = AgentPaths::new(root);
    let run_id = Utc::now().format("%Y%m%dT%H%M%S%.3fZ").to_string();
    info!(run_id = %run_id, goal = task.goal(), "starting run");

    let recent = match mode {
        RunMode::Fix => load_completions(&paths.history_path)?.completions,
        RunMode::Normal => Vec::new(),
    };
    let builder = PromptBuilder::new(&config.completion_marker, config.policy.allowed())?;
    let mut project_context = context.refresh()?;
    let mut prompt = builder.initial(task, &project_context, &recent)?;
    let mut history = AttemptHistory::new();

    for iter in 1..=config.max_iterations {
        let started_at = Utc::now();
        let clock = Instant::now();
        debug!(iter, prompt = %prompt.preview(), "prompt");
        let prompt_text = prompt.render();

        let reply = session.generate(&prompt_text)?;
        let backend = session.active_name().to_string();
        info!(iter, backend = %backend, reply_chars = reply.chars().count(), "model replied");

        let log = IterationLog {
            paths: &paths,
            run_id: &run_id,
            iter,
            backend: &backend,
            prompt: &prompt_text,
            reply: &reply,
            started_at: started_at.to_rfc3339(),
            clock,
        };

        let (commands, strategy) = match classify_reply(&reply, &config.completion_marker) {
            Reply::Done { manual, summary } => {
                debug!(iter, state = %LoopState::Done, "completion marker");
                log.write(LoopState::Done, None, None, &[], None)?;
                on_iteration(&IterationReport {
                    iter,
                    max_iterations: config.max_iterations,
                    backend: &backend,
                    reply: &reply,
                    state: LoopState::Done,
                    commands: None,
                    record: None,
                });
                let saved = persist_completion(
                    &paths.history_path,
                    mode,
                    task.goal(),
                    summary.as_deref(),
                    &history,
                )?;
                return Ok(LoopOutcome {
                    run_id,
                    iterations: iter,
                    attempts: history,
                    stop: LoopStop::Done {
                        manual,
                        summary,
                        saved,
                    },
                });
            }
            Reply::Malformed => {
                warn!(iter, "reply has neither commands nor completion marker");
                log.write(LoopState::FailedLimit, None, None, &[], None)?;
                on_iteration(&IterationReport {
                    iter,
                    max_iterations: config.max_iterations,
                    backend: &backend,
                    reply: &reply,
                    state: LoopState::FailedLimit,
                    commands: None,
                    record: None,
                });
                let saved_to = save_bad_reply(&paths, &reply)?;
                return Ok(LoopOutcome {
                    run_id,
                    iterations: iter,
                    attempts: history,
                    stop: LoopStop::Malformed { reply, saved_to },
                });
            }
            Reply::Commands { commands, strategy } => (commands, strategy),
        };
        debug!(iter, state = %LoopState::GotCommands, strategy = %strategy, "command block");

        let step = apply_commands(root, &commands, shell, approver, config)?;
        let record = match &step.verdict {
            StepVerdict::Success => AttemptRecord::success(&strategy),
            StepVerdict::Failure { error } => AttemptRecord::failure(&strategy, error),
        };
        info!(
            iter,
            strategy = %strategy,
            outcome = ?record.outcome,
            changed = step.changed.len(),
            "step finished"
        );
        history.push(record.clone());

        log.write(
            LoopState::AwaitingModel,
            Some(&record),
            Some(&commands),
            &step.changed,
            step.shell.as_ref(),
        )?;
        on_iteration(&IterationReport {
            iter,
            max_iterations: config.max_iterations,
            backend: &backend,
            reply: &reply,
            state: LoopState::Applying,
            commands: Some(&commands),
            record: Some(&record),
        });

        prompt = match &step.verdict {
            StepVerdict::Success => {
                project_context = context.refresh()?;
                builder.verify(task.goal(), &project_context, &history)?
            }
            StepVerdict::Failure { error } => {
                let focus = find_focus_file(root, &commands)?;
                if let Some(focus) = &focus {
                    debug!(path = %focus.path, "repair prompt focuses on file");
                }
                builder.repair(
                    task.goal(),
                    FailedStep {
                        commands: &commands,
                        error,
                        focus: focus.as_ref(),
                    },
                    &project_context,
                    &history,
                )?
            }
        };
    }

    warn!(
        max_iterations = config.max_iterations,
        state = %LoopState::FailedLimit,
        "iteration limit reached"
    );
    Ok(LoopOutcome {
        run_id,
        iterations: config.max_iterations,
        attempts: history,
        stop: LoopStop::IterationLimit {
            max_iterations: config.max_iterations,
        },
    })
}

struct StepResult {
    verdict: StepVerdict,
    changed: Vec<String>,
    shell: Option<ShellResult>,
}

fn apply_commands<S: ShellRunner, A: Approver>(
    root: &Path,
    commands: &str,
    shell: &S,
    approver: &A,
    config: &LoopConfig,
) -> Result<StepResult> {
    let disallowed = config.policy.disallowed_programs(commands);
    if !disallowed.is_empty() && !approver.approve(commands, &disallowed)? {
        warn!(programs = ?disallowed, "operator denied command block");
        return Ok(StepResult {
            verdict: StepVerdict::Failure {
                error: format!(
                    "the operator refused to run programs outside the allow-list: {}. \
                     Use only: {}",
                    disallowed.join(", "),
                    config.policy.allowed().join(", ")
                ),
            },
            changed: Vec::new(),
            shell: None,
        });
    }

    debug!(state = %LoopState::Applying, "applying command block");
    let watched = watched_paths(commands);
    let before = snapshot(root, &watched)?;
    let result = shell.run(&ShellRequest {
        workdir: root.to_path_buf(),
        commands: commands.to_string(),
        timeout: config.shell_timeout,
        output_limit_bytes: config.output_limit_bytes,
    })?;
    let after = snapshot(root, &watched)?;

    let verdict = classify_step(result.success, &result.error_text(), &before, &after);
    Ok(StepResult {
        verdict,
        changed: changed_paths(&before, &after),
        shell: Some(result),
    })
}

/// The last path-like token of `commands` that is an existing regular file.
fn find_focus_file(root: &Path, commands: &str) -> Result<Option<FocusFile>> {
    let Some(path) = focus_file_candidates(commands)
        .into_iter()
        .find(|candidate| root.join(candidate).is_file())
    else {
        return Ok(None);
    };
    let full = root.join(&path);
    let bytes = fs::read(&full).with_context(|| format!("read {}", full.display()))?;
    Ok(Some(FocusFile {
        path,
        content: String::from_utf8_lossy(&bytes).into_owned(),
    }))
}

/// Save the completion entry. Without a summary block the successful
/// strategies stand in for it; with neither, nothing is saved.
fn persist_completion(
    history_path: &Path,
    mode: RunMode,
    goal: &str,
    summary: Option<&str>,
    attempts: &AttemptHistory,
) -> Result<bool> {
    let summary = summary.map(str::to_string).or_else(|| {
        let strategies = attempts.successful_strategies();
        (!strategies.is_empty()).then(|| strategies.join("; "))
    });
    let Some(summary) = summary else {
        debug!("no summary or successful step; completion history unchanged");
        return Ok(false);
    };
    let entry = CompletionEntry {
        goal: goal.to_string(),
        summary,
    };
    match mode {
        RunMode::Normal => prepend_completion(history_path, entry)?,
        RunMode::Fix => replace_completions(history_path, entry)?,
    }
    Ok(true)
}

struct IterationLog<'a> {
    paths: &'a AgentPaths,
    run_id: &'a str,
    iter: u32,
    backend: &'a str,
    prompt: &'a str,
    reply: &'a str,
    started_at: String,
    clock: Instant,
}

impl IterationLog<'_> {
    fn write(
        &self,
        state: LoopState,
        record: Option<&AttemptRecord>,
        commands: Option<&str>,
        changed: &[String],
        shell: Option<&ShellResult>,
    ) -> Result<()> {
        let meta = IterationMeta {
            run_id: self.run_id.to_string(),
            iter: self.iter,
            backend: self.backend.to_string(),
            state,
            strategy: record.map(|r| r.strategy.clone()),
            outcome: record.map(|r| r.outcome),
            changed_paths: changed.to_vec(),
            started_at: self.started_at.clone(),
            ended_at: Utc::now().to_rfc3339(),
            duration_ms: u64::try_from(self.clock.elapsed().as_millis()).unwrap_or(u64::MAX),
        };
        write_iteration(&IterationWriteRequest {
            paths: self.paths,
            meta: &meta,
            prompt: self.prompt,
            reply: Some(self.reply),
            commands,
            shell,
        })?;
        Ok(())
    }
}

/// Label for a finished attempt, used in CLI progress output.
pub fn outcome_label(outcome: AttemptOutcome) -> &'static str {
    match outcome {
        AttemptOutcome::Success => "ok",
        AttemptOutcome::Failure => "failed",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::completion_log::load_completions;
    use crate::io::context::MissingContextError;
    use crate::test_support::{
        AutoApprover, ScriptedBackend, ScriptedShell, ScriptedStep, StaticContext, TestWorkspace,
    };
    use std::cell::RefCell;
    use std::rc::Rc;

    fn config(max_iterations: u32) -> LoopConfig {
        LoopConfig {
            max_iterations,
            ..LoopConfig::from_agent_config(&AgentConfig::default())
        }
    }

    fn bash(commands: &str) -> String {
        format!("```strategy\nstep\n```\n```bash\n{commands}\n```")
    }

    struct Harness {
        workspace: TestWorkspace,
        context: StaticContext,
        approver: AutoApprover,
        mode: RunMode,
        max_iterations: u32,
    }

    struct Run {
        outcome: Result<LoopOutcome>,
        prompts: Rc<RefCell<Vec<String>>>,
        blocks: Rc<RefCell<Vec<String>>>,
        reports: Vec<(u32, LoopState)>,
    }

    impl Harness {
        fn new() -> Self {
            Self {
                workspace: TestWorkspace::new().expect("workspace"),
                context: StaticContext::new("PROJECT CONTEXT"),
                approver: AutoApprover::allow(),
                mode: RunMode::Normal,
                max_iterations: 15,
            }
        }

        fn run(&self, task: &str, replies: Vec<String>, steps: Vec<ScriptedStep>) -> Run {
            let backend =
                ScriptedBackend::replies("scripted", replies.iter().map(String::as_str));
            let prompts = backend.prompts();
            let mut session = BackendSession::new(vec![Box::new(backend)]).expect("session");
            let shell = ScriptedShell::new(steps);
            let blocks = shell.blocks();
            let mut reports = Vec::new();

            let outcome = run_agent(
                self.workspace.path(),
                &Task::new(task),
                self.mode,
                Collaborators {
                    session: &mut session,
                    shell: &shell,
                    context: &self.context,
                    approver: &self.approver,
                },
                &config(self.max_iterations),
                |report| reports.push((report.iter, report.state)),
            );
            Run {
                outcome,
                prompts,
                blocks,
                reports,
            }
        }
    }

    #[test]
    fn completion_marker_never_executes_commands() {
        let harness = Harness::new();
        let run = harness.run(
            "clean up",
            vec!["DONE\n```bash\nrm -rf src\n```\n```done\nnothing left\n```".to_string()],
            Vec::new(),
        );

        let outcome = run.outcome.expect("run");
        assert!(run.blocks.borrow().is_empty());
        assert_eq!(outcome.iterations, 1);
        assert_eq!(
            outcome.stop,
            LoopStop::Done {
                manual: None,
                summary: Some("nothing left".to_string()),
                saved: true,
            }
        );
        assert_eq!(run.reports, vec![(1, LoopState::Done)]);
    }

    #[test]
    fn unchanged_watched_file_is_a_noop_failure() {
        let harness = Harness::new();
        harness
            .workspace
            .write("existing.txt", "foo bar\n")
            .expect("write");

        let run = harness.run(
            "rename foo",
            vec![bash("sed -i 's/foo/foo/' existing.txt"), "DONE".to_string()],
            vec![ScriptedStep::ok()],
        );

        let outcome = run.outcome.expect("run");
        let last = outcome.attempts.last().expect("attempt");
        assert_eq!(last.outcome, AttemptOutcome::Failure);
        assert!(
            last.error
                .as_deref()
                .is_some_and(|e| e.contains("pattern not found"))
        );

        let prompts = run.prompts.borrow();
        assert_eq!(prompts.len(), 2);
        assert!(prompts[1].contains("### File: existing.txt"));
        assert!(prompts[1].contains("foo bar"));
        assert!(!prompts[1].contains("PROJECT CONTEXT"));
    }

    #[test]
    fn created_file_counts_as_success_and_refreshes_context() {
        let harness = Harness::new();
        let run = harness.run(
            "Add a.txt\nnpm ERR! something broke",
            vec![bash("touch a.txt"), "DONE".to_string()],
            vec![ScriptedStep::ok().writing("a.txt", "")],
        );

        let outcome = run.outcome.expect("run");
        assert!(outcome.attempts.records()[0].is_success());
        // initial refresh plus one after the successful step
        assert_eq!(harness.context.refreshes(), 2);

        let prompts = run.prompts.borrow();
        assert!(prompts[0].contains("npm ERR! something broke"));
        assert!(prompts[1].contains("<goal>\nAdd a.txt\n</goal>"));
        assert!(!prompts[1].contains("npm ERR!"));
    }

    #[test]
    fn history_grows_by_one_per_executed_block() {
        let mut harness = Harness::new();
        harness.max_iterations = 3;
        let run = harness.run(
            "make files",
            vec![bash("touch a.txt"), bash("touch b.txt"), bash("npm test")],
            vec![
                ScriptedStep::ok().writing("a.txt", ""),
                ScriptedStep::ok().writing("b.txt", ""),
                ScriptedStep::fail(1, "1 test failed"),
            ],
        );

        let outcome = run.outcome.expect("run");
        assert_eq!(outcome.attempts.len(), 3);
        assert_eq!(
            outcome.attempts.last().map(|r| r.outcome),
            Some(AttemptOutcome::Failure)
        );
        assert_eq!(
            outcome.stop,
            LoopStop::IterationLimit { max_iterations: 3 }
        );
    }

    #[test]
    fn iteration_cap_bounds_model_requests() {
        let mut harness = Harness::new();
        harness.max_iterations = 2;
        let replies = (0..5).map(|_| bash("npm run build")).collect();
        let steps = (0..5).map(|_| ScriptedStep::fail(1, "build failed")).collect();
        let run = harness.run("build", replies, steps);

        let outcome = run.outcome.expect("run");
        assert_eq!(outcome.iterations, 2);
        assert_eq!(run.prompts.borrow().len(), 2);
        assert_eq!(run.blocks.borrow().len(), 2);
    }

    #[test]
    fn malformed_reply_is_terminal_and_saved() {
        let harness = Harness::new();
        let reply = "You could try editing the config.".to_string();
        let run = harness.run("fix config", vec![reply.clone()], Vec::new());

        let outcome = run.outcome.expect("run");
        let LoopStop::Malformed {
            reply: returned,
            saved_to,
        } = outcome.stop
        else {
            panic!("expected malformed stop");
        };
        assert_eq!(returned, reply);
        assert_eq!(fs::read_to_string(saved_to).expect("bad reply"), reply);
        assert!(outcome.attempts.is_empty());
    }

    #[test]
    fn denied_block_is_not_executed_and_triggers_repair() {
        let mut harness = Harness::new();
        harness.approver = AutoApprover::deny();
        let run = harness.run(
            "download",
            vec![bash("curl -o data.json https://example.com"), "DONE".to_string()],
            Vec::new(),
        );

        let outcome = run.outcome.expect("run");
        assert!(run.blocks.borrow().is_empty());
        assert_eq!(harness.approver.asked(), 1);
        let record = &outcome.attempts.records()[0];
        assert!(!record.is_success());
        assert!(record.error.as_deref().is_some_and(|e| e.contains("curl")));
        assert!(run.prompts.borrow()[1].contains("### Failed Step"));
    }

    #[test]
    fn allowed_block_skips_approval() {
        let harness = Harness::new();
        let run = harness.run(
            "dir",
            vec![bash("mkdir -p src && cd src && touch x.ts"), "DONE".to_string()],
            vec![ScriptedStep::ok().writing("src/x.ts", "")],
        );
        let outcome = run.outcome.expect("run");
        assert_eq!(harness.approver.asked(), 0);
        assert_eq!(run.blocks.borrow().len(), 1);
        let record = &outcome.attempts.records()[0];
        assert!(record.is_success(), "record: {record:?}");
    }

    #[test]
    fn normal_mode_prepends_strategies_when_summary_missing() {
        let harness = Harness::new();
        let paths = AgentPaths::new(harness.workspace.path());
        prepend_completion(
            &paths.history_path,
            CompletionEntry {
                goal: "older".to_string(),
                summary: "older work".to_string(),
            },
        )
        .expect("seed history");

        let run = harness.run(
            "add a",
            vec![
                "```strategy\ncreate a.txt\n```\n```bash\ntouch a.txt\n```".to_string(),
                "done".to_string(),
            ],
            vec![ScriptedStep::ok().writing("a.txt", "")],
        );
        run.outcome.expect("run");

        // normal mode does not show history to the model
        assert!(!run.prompts.borrow()[0].contains("older work"));
        let log = load_completions(&paths.history_path).expect("load");
        assert_eq!(log.completions.len(), 2);
        assert_eq!(log.completions[0].goal, "add a");
        assert_eq!(log.completions[0].summary, "create a.txt");
    }

    #[test]
    fn done_without_summary_or_success_saves_nothing() {
        let harness = Harness::new();
        let run = harness.run("nothing to do", vec!["DONE".to_string()], Vec::new());
        let outcome = run.outcome.expect("run");
        assert!(matches!(outcome.stop, LoopStop::Done { saved: false, .. }));
        let paths = AgentPaths::new(harness.workspace.path());
        assert!(!paths.history_path.exists());
    }

    #[test]
    fn fix_mode_shows_history_and_replaces_it() {
        let mut harness = Harness::new();
        harness.mode = RunMode::Fix;
        let paths = AgentPaths::new(harness.workspace.path());
        for goal in ["first", "second"] {
            prepend_completion(
                &paths.history_path,
                CompletionEntry {
                    goal: goal.to_string(),
                    summary: format!("{goal} summary"),
                },
            )
            .expect("seed history");
        }

        let run = harness.run(
            "page is blank",
            vec!["DONE\n```done\nfixed the router import\n```".to_string()],
            Vec::new(),
        );
        run.outcome.expect("run");

        let first_prompt = run.prompts.borrow()[0].clone();
        assert!(first_prompt.contains("### Recent Work"));
        assert!(first_prompt.contains("- second: second summary"));

        let log = load_completions(&paths.history_path).expect("load");
        assert_eq!(
            log.completions,
            vec![CompletionEntry {
                goal: "page is blank".to_string(),
                summary: "fixed the router import".to_string(),
            }]
        );
    }

    #[test]
    fn missing_context_aborts_the_run() {
        let mut harness = Harness::new();
        harness.context = StaticContext::missing();
        let run = harness.run("anything", vec!["DONE".to_string()], Vec::new());

        let err = run.outcome.unwrap_err();
        assert!(err.downcast_ref::<MissingContextError>().is_some());
        assert!(run.prompts.borrow().is_empty());
    }

    #[test]
    fn iteration_logs_are_written() {
        let harness = Harness::new();
        let run = harness.run(
            "add a",
            vec![bash("touch a.txt"), "DONE".to_string()],
            vec![ScriptedStep::ok().writing("a.txt", "")],
        );
        let outcome = run.outcome.expect("run");

        let dir = AgentPaths::new(harness.workspace.path())
            .iterations_dir
            .join(&outcome.run_id);
        assert!(dir.join("1").join("shell.log").is_file());
        assert!(dir.join("1").join("meta.json").is_file());
        assert!(dir.join("2").join("reply.md").is_file());
        assert!(!dir.join("2").join("shell.log").exists());
    }
}
