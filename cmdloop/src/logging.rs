//! Development-time tracing.
//!
//! # Separation of Concerns
//!
//! - **Tracing (this module)**: diagnostics via `RUST_LOG`, output to stderr.
//!   Not persisted, not part of the product output on stdout.
//!
//! - **Iteration logging (`io/iteration_log`)**: product artifacts in
//!   `.cmdloop/iterations/`. Always written, unaffected by `RUST_LOG`.

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

const DEFAULT_FILTER: &str = "cmdloop=info";

/// Initialize the tracing subscriber.
///
/// Reads `RUST_LOG`; defaults to `cmdloop=info`. Output: stderr, compact.
///
/// # Example
/// ```bash
/// RUST_LOG=cmdloop=debug cmdloop run --task "add a README"
/// ```
pub fn init() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).compact())
        .init();
}
