//! Telemetry helpers for structured logging and tracing.

use tracing_subscriber::EnvFilter;

const DEFAULT_FILTER: &str = "mirror_scheduler=info";

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
}

/// Initialize tracing. Users can install their own subscriber; this helper
/// installs an env-based fmt subscriber (`RUST_LOG`, defaulting to
/// `mirror_scheduler=info`) only if none is set.
pub fn init_tracing() {
    if tracing::dispatcher::has_been_set() {
        return;
    }
    let _ = tracing_subscriber::fmt().with_env_filter(env_filter()).try_init();
}

/// Like [`init_tracing`], but writes through the test harness so output is
/// captured per test.
pub fn init_test_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter())
        .with_test_writer()
        .try_init();
}
