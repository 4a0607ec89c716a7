use tracing_subscriber::{fmt, EnvFilter};

/// Environment variable holding the log filter.
pub const LOG_ENV: &str = "RETRACE_LOG";

/// Initialize structured logging with environment filter.
/// Set RETRACE_LOG=debug (or trace, info, warn, error) for verbosity control.
pub fn init_logging() {
    init_logging_with_default("info");
}

/// Like [`init_logging`], but with a caller-chosen filter used when
/// `RETRACE_LOG` is unset (usually the `[logging] filter` config value).
pub fn init_logging_with_default(default_filter: &str) {
    let filter = EnvFilter::try_from_env(LOG_ENV)
        .unwrap_or_else(|_| EnvFilter::new(default_filter));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .init();
}
