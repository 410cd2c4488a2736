//! Structured logging setup, initialized once from `main`.
//!
//! Verbosity is controlled by `RUST_LOG` (`tracing_subscriber::EnvFilter`
//! syntax), defaulting to `info` when unset.

use tracing_subscriber::EnvFilter;

/// Install the global `tracing` subscriber. Safe to call at most once per
/// process; a second call is a caller bug and is logged, not panicked on.
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let result = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();

    if let Err(err) = result {
        eprintln!("logging already initialized: {err}");
    }
}
