//! Diagnostic tracing for the engine.
//!
//! # Separation of Concerns
//!
//! - **Tracing (this module)**: diagnostics on stderr, filtered by `RUST_LOG`
//!   or `-v`. Not persisted.
//!
//! - **Run logs (`io/run_log`)**: prompts, completions, attempt output and the
//!   final report under `.codeagent/runs/`. Always written, unaffected by
//!   log level.

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize the tracing subscriber.
///
/// `RUST_LOG` wins when set. Otherwise `verbosity` picks the level for this
/// crate: 0 → `warn`, 1 → `info`, 2 → `debug`, 3+ → `trace`.
///
/// # Example
/// ```bash
/// RUST_LOG=codeagent=debug codeagent run "a todo app"
/// ```
pub fn init(verbosity: u8) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive(verbosity)));

    // A second init (tests, embedding) keeps the first subscriber.
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).compact())
        .try_init();
}

fn default_directive(verbosity: u8) -> &'static str {
    match verbosity {
        0 => "warn",
        1 => "warn,codeagent=info",
        2 => "warn,codeagent=debug",
        _ => "warn,codeagent=trace",
    }
}
