use tracing_subscriber::{fmt, EnvFilter};

/// Initialize structured logging with environment filter.
/// Set GPUWIRE_LOG=debug (or trace, info, warn, error) for verbosity control.
/// Safe to call more than once; later calls leave the first subscriber in place.
pub fn init_logging() {
    let filter = EnvFilter::try_from_env("GPUWIRE_LOG")
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let _ = fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .try_init();
}
