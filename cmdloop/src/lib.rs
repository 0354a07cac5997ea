//! Command-line coding agent loop.
//!
//! The loop prompts a hosted model with a task and a project snapshot, runs
//! the shell commands from its reply, and feeds the outcome back until the
//! model signals completion or an iteration cap is reached.
//!
//! - **[`core`]**: pure logic (reply parsing, shell text analysis, change
//!   detection). No I/O.
//! - **[`io`]**: side effects (HTTP backends, shell, filesystem, terminal).
//!   Behind traits where tests substitute scripted doubles.
//!
//! [`agent_loop`] drives one run; [`session`] owns backend fallback state.

pub mod agent_loop;
pub mod core;
pub mod exit_codes;
pub mod io;
pub mod logging;
pub mod session;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
