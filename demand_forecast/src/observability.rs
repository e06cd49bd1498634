//! Logging setup

use tracing_subscriber::EnvFilter;

/// Install a JSON log subscriber filtered by `RUST_LOG` (default `info`).
///
/// Calling it again, or after another subscriber is installed, does nothing.
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .json()
        .with_current_span(true)
        .with_target(false)
        .try_init();
}

