//! `cmdloop`: prompt a model, run its shell commands, repeat until done.
//!
//! State lives in `.cmdloop/` under the current directory: `config.toml`,
//! the completion `history.json`, and per-iteration logs.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand};

use cmdloop::agent_loop::{
    Collaborators, IterationReport, LoopConfig, LoopOutcome, LoopStop, RunMode, outcome_label,
    run_agent,
};
use cmdloop::core::task::Task;
use cmdloop::core::types::LoopState;
use cmdloop::exit_codes;
use cmdloop::io::approver::TerminalApprover;
use cmdloop::io::backend::BackendError;
use cmdloop::io::completion_log::{clear_completions, load_completions};
use cmdloop::io::config::{AgentConfig, load_config};
use cmdloop::io::context::{CommandContext, MissingContextError};
use cmdloop::io::init::{AgentPaths, InitOptions, init_agent};
use cmdloop::io::input::{TaskInput, read_task};
use cmdloop::io::notify::notify;
use cmdloop::io::shell::BashShell;
use cmdloop::logging;
use cmdloop::session::BackendSession;

const NOTIFY_TITLE: &str = "cmdloop";

#[derive(Parser)]
#[command(
    name = "cmdloop",
    version,
    about = "Let a language model drive shell commands until a task is done"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the agent loop on a task (read from stdin unless given).
    Run(RunArgs),
    /// Show or clear the completion history.
    History {
        /// Remove every entry.
        #[arg(long)]
        clear: bool,
    },
    /// Create `.cmdloop/` with a default config.
    Init {
        /// Overwrite an existing config.
        #[arg(short, long)]
        force: bool,
    },
}

#[derive(Args, Debug)]
struct RunArgs {
    /// Fix a problem left by earlier runs; their summaries become context.
    #[arg(long)]
    fix: bool,
    /// Task text.
    #[arg(long, conflicts_with = "task_file")]
    task: Option<String>,
    /// Read the task from a file.
    #[arg(long)]
    task_file: Option<PathBuf>,
    /// Override `max_iterations` from the config.
    #[arg(long)]
    max_iterations: Option<u32>,
    /// Config file (default `.cmdloop/config.toml`).
    #[arg(long)]
    config: Option<PathBuf>,
    /// Do not send a desktop notification when the run ends.
    #[arg(long)]
    no_notify: bool,
}

fn main() {
    logging::init();
    let cli = Cli::parse();
    let code = match dispatch(cli) {
        Ok(code) => code,
        Err(err) => {
            eprintln!("error: {err:#}");
            exit_codes::ERROR
        }
    };
    std::process::exit(code);
}

fn dispatch(cli: Cli) -> Result<i32> {
    let root = std::env::current_dir().context("resolve current directory")?;
    match cli.command {
        Command::Run(args) => Ok(cmd_run(&root, &args)),
        Command::History { clear } => cmd_history(&root, clear),
        Command::Init { force } => cmd_init(&root, force),
    }
}

/// Top-level handler for `run`: every outcome, including fatal errors, ends
/// here with a printed status, a notification and an exit code.
fn cmd_run(root: &Path, args: &RunArgs) -> i32 {
    let paths = AgentPaths::new(root);
    let config_path = args.config.clone().unwrap_or(paths.config_path);
    let config = load_config(&config_path);
    let notify_enabled =
        !args.no_notify && !matches!(config, Ok(AgentConfig { notify: false, .. }));

    if let Err(err) = ctrlc::set_handler(move || {
        let status = "Interrupted by the operator.";
        println!("\n{status}");
        if notify_enabled {
            notify(NOTIFY_TITLE, status);
        }
        std::process::exit(exit_codes::INTERRUPTED);
    }) {
        tracing::warn!(error = %err, "could not install Ctrl-C handler");
    }

    let result = config.and_then(|cfg| execute_run(root, args, &cfg));
    let (code, status) = match result {
        Ok(outcome) => describe_outcome(&outcome),
        Err(err) => (exit_codes::ERROR, describe_error(&err)),
    };

    println!("\n{status}");
    if notify_enabled {
        notify(NOTIFY_TITLE, status.lines().next().unwrap_or(&status));
    }
    code
}

fn execute_run(root: &Path, args: &RunArgs, cfg: &AgentConfig) -> Result<LoopOutcome> {
    let input = match (&args.task, &args.task_file) {
        (Some(text), _) => TaskInput::Text(text),
        (None, Some(path)) => TaskInput::File(path),
        (None, None) => TaskInput::Stdin,
    };
    let task = Task::new(&read_task(input)?);

    let mut loop_config = LoopConfig::from_agent_config(cfg);
    if let Some(max) = args.max_iterations {
        if max == 0 {
            bail!("--max-iterations must be > 0");
        }
        loop_config.max_iterations = max;
    }

    let mut session = BackendSession::from_config(&cfg.backends)?;
    let context = CommandContext::new(
        root,
        cfg.context.command.clone(),
        &cfg.context.file,
        cfg.output_limit_bytes,
    );
    let mode = if args.fix { RunMode::Fix } else { RunMode::Normal };

    run_agent(
        root,
        &task,
        mode,
        Collaborators {
            session: &mut session,
            shell: &BashShell,
            context: &context,
            approver: &TerminalApprover,
        },
        &loop_config,
        print_report,
    )
}

fn print_report(report: &IterationReport<'_>) {
    println!(
        "\n--- iteration {}/{} ({}) ---",
        report.iter, report.max_iterations, report.backend
    );
    println!("{}", report.reply.trim());
    if report.state != LoopState::Applying {
        return;
    }
    if let Some(record) = report.record {
        match &record.error {
            Some(error) => println!(
                "\n[{}] {}\n{}",
                outcome_label(record.outcome),
                record.strategy,
                error.trim()
            ),
            None => println!("\n[{}] {}", outcome_label(record.outcome), record.strategy),
        }
    }
}

fn describe_outcome(outcome: &LoopOutcome) -> (i32, String) {
    match &outcome.stop {
        LoopStop::Done {
            manual, summary, ..
        } => {
            let mut status = format!("Task completed in {} iteration(s).", outcome.iterations);
            if let Some(summary) = summary {
                status.push_str(&format!("\n\nSummary:\n{summary}"));
            }
            if let Some(manual) = manual {
                status.push_str(&format!("\n\nManual steps:\n{manual}"));
            }
            (exit_codes::OK, status)
        }
        LoopStop::Malformed { saved_to, .. } => (
            exit_codes::MALFORMED_REPLY,
            format!(
                "The model replied with neither commands nor completion; reply saved to {}.",
                saved_to.display()
            ),
        ),
        LoopStop::IterationLimit { max_iterations } => (
            exit_codes::ITERATION_LIMIT,
            format!("Reached the limit of {max_iterations} iterations without completion."),
        ),
    }
}

fn describe_error(err: &anyhow::Error) -> String {
    if let Some(backend) = err.downcast_ref::<BackendError>() {
        return format!("Model request failed: {backend}");
    }
    if let Some(context) = err.downcast_ref::<MissingContextError>() {
        return format!("Stopped: {context}");
    }
    format!("Run failed: {err:#}")
}

fn cmd_history(root: &Path, clear: bool) -> Result<i32> {
    let paths = AgentPaths::new(root);
    if clear {
        clear_completions(&paths.history_path)?;
        println!("Completion history cleared.");
        return Ok(exit_codes::OK);
    }
    let log = load_completions(&paths.history_path)?;
    if log.completions.is_empty() {
        println!("No completed tasks recorded.");
    }
    for (idx, entry) in log.completions.iter().enumerate() {
        println!("{}. {}\n   {}", idx + 1, entry.goal, entry.summary);
    }
    Ok(exit_codes::OK)
}

fn cmd_init(root: &Path, force: bool) -> Result<i32> {
    let paths = init_agent(root, &InitOptions { force })?;
    println!("Wrote {}", paths.config_path.display());
    Ok(exit_codes::OK)
}
