use tracing_subscriber::EnvFilter;

/// Environment variable holding the log filter, checked before `RUST_LOG`.
pub const LOG_ENV: &str = "AGKNOW_LOG";

const DEFAULT_FILTER: &str = "info";

/// Install a fmt subscriber for the process.
///
/// The filter is taken from `filter`, then `AGKNOW_LOG`, then `RUST_LOG`,
/// falling back to `info`. Calling this twice is harmless: the second
/// subscriber is simply not installed.
pub fn init_logging(filter: Option<&str>) {
    let filter = filter
        .map(str::to_string)
        .or_else(|| std::env::var(LOG_ENV).ok())
        .or_else(|| std::env::var("RUST_LOG").ok())
        .unwrap_or_else(|| DEFAULT_FILTER.to_string());

    let env_filter =
        EnvFilter::try_new(&filter).unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(true)
        .try_init();
}
