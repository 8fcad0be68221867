//! Telemetry helpers for structured logging and tracing.

/// Install a `RUST_LOG`-filtered fmt subscriber that prints worker thread
/// names, unless a global subscriber is already set. Safe to call from every
/// test and bench.
pub fn init_tracing() {
    if tracing::dispatcher::has_been_set() {
        return;
    }
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_thread_names(true)
        .try_init();
}
