// tracing setup - logs go to stderr so `check` output on stdout stays clean

use tracing_subscriber::EnvFilter;

use crate::config::LogFormat;

/// RUST_LOG wins when set, otherwise `level` applies to this crate and
/// everything else stays at warn.
pub fn init(level: &str, format: LogFormat) {
    let filter = std::env::var("RUST_LOG")
        .map(EnvFilter::new)
        .unwrap_or_else(|_| EnvFilter::new(format!("warn,querygate={level},tower_http={level}")));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);

    // try_init: a subscriber may already be set (tests)
    let _ = match format {
        LogFormat::Json => builder.json().try_init(),
        LogFormat::Text => builder.with_ansi(false).try_init(),
    };
}
