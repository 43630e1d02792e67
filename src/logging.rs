//! Tracing subscriber setup.
//!
//! `PAPERTRADE_LOG` takes precedence over `RUST_LOG`; the default level is
//! `info`. `PAPERTRADE_LOG_FORMAT=json` switches to JSON lines.

use tracing_subscriber::EnvFilter;

pub fn init() {
    let builder = tracing_subscriber::fmt()
        .with_env_filter(env_filter())
        .with_writer(std::io::stderr)
        .with_target(false);

    // A subscriber may already be installed, e.g. by a test harness.
    let _ = match log_format().as_str() {
        "json" => builder.json().try_init(),
        _ => builder.try_init(),
    };
}

fn env_filter() -> EnvFilter {
    let override_level = std::env::var("PAPERTRADE_LOG")
        .ok()
        .filter(|value| !value.trim().is_empty())
        .or_else(|| std::env::var("RUST_LOG").ok());

    match override_level {
        Some(value) => EnvFilter::new(value),
        None => EnvFilter::new("info"),
    }
}

fn log_format() -> String {
    std::env::var("PAPERTRADE_LOG_FORMAT")
        .ok()
        .filter(|value| !value.trim().is_empty())
        .unwrap_or_else(|| "plain".to_string())
}
