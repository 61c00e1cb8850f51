use tracing_subscriber::{fmt, EnvFilter};

/// Install the global fmt subscriber. Filter comes from `RUST_LOG`, default
/// `info`. Logs go to stderr so the end-of-test summary owns stdout.
pub fn init() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}
