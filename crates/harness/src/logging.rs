//! Logging setup
//!
//! `RUST_LOG` wins when set. Otherwise the `logging` variable picks the
//! level: `debug` shows every subprocess line, `basic` shows progress, and
//! anything else keeps the harness quiet.

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Environment variable selecting the harness verbosity
pub const LOGGING_VAR: &str = "logging";

/// Map a `logging` value onto a filter directive
pub fn level_for(logging: Option<&str>) -> &'static str {
    match logging {
        Some("debug") => "debug",
        Some("basic") => "info",
        _ => "warn",
    }
}

/// Install the global subscriber; later calls are no-ops
pub fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let logging = std::env::var(LOGGING_VAR).ok();
        EnvFilter::new(level_for(logging.as_deref()))
    });

    let _ = tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .try_init();
}
