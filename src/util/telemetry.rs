//! Telemetry helpers for structured logging and tracing.

/// Initialize tracing/telemetry. Users can install their own subscriber;
/// this helper installs an env-based subscriber if none is set, defaulting
/// to `tier_scheduler=info` when `RUST_LOG` is absent.
///
/// Thread names are included in output: workers and tier threads are named
/// after their pool capability and tier index, which makes routing visible
/// in logs.
pub fn init_tracing() {
    if tracing::dispatcher::has_been_set() {
        return;
    }
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("tier_scheduler=info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_thread_names(true)
        .try_init();
}
