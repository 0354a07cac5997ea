//! Deterministic, pure logic shared by the agent loop.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! data structures and return deterministic outputs suitable for tests.

pub mod change;
pub mod policy;
pub mod reply;
pub mod shell_text;
pub mod task;
pub mod types;
