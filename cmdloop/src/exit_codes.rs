//! Stable exit codes for `cmdloop` commands.

/// The command succeeded; for `run`, the model signalled completion.
pub const OK: i32 = 0;
/// Invalid config, missing context, backend failure or any other error.
pub const ERROR: i32 = 1;
/// `cmdloop run` reached `max_iterations` without completion.
pub const ITERATION_LIMIT: i32 = 2;
/// `cmdloop run` stopped on a reply with neither commands nor the marker.
pub const MALFORMED_REPLY: i32 = 3;
/// Interrupted by the operator (Ctrl-C).
pub const INTERRUPTED: i32 = 130;
