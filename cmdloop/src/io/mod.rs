//! Side-effecting collaborators: filesystem, processes, HTTP, terminal.

pub mod approver;
pub mod atomic;
pub mod backend;
pub mod completion_log;
pub mod config;
pub mod context;
pub mod fingerprint;
pub mod gemini;
pub mod init;
pub mod input;
pub mod iteration_log;
pub mod notify;
pub mod openai;
pub mod process;
pub mod prompt;
pub mod shell;
