//! # Structured Logging
//!
//! tracing-subscriber initialization: console output filtered by
//! `RUST_LOG` (or an environment-based default), JSON formatting when
//! `ORBIT_LOG_JSON=true`. Safe to call more than once.

use std::sync::OnceLock;

use tracing_subscriber::EnvFilter;

static LOGGER_INITIALIZED: OnceLock<()> = OnceLock::new();

pub fn init_structured_logging() {
    LOGGER_INITIALIZED.get_or_init(|| {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(default_log_level()));

        let json = std::env::var("ORBIT_LOG_JSON").as_deref() == Ok("true");

        let builder = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .with_level(true);

        // try_init: a subscriber may already be installed (tests, embedders).
        let result = if json {
            builder.json().try_init()
        } else {
            builder.try_init()
        };

        if result.is_err() {
            tracing::debug!("Global tracing subscriber already initialized");
        }
    });
}

fn default_log_level() -> String {
    match std::env::var("ORBIT_ENV").as_deref() {
        Ok("production") => "info".to_string(),
        _ => "debug".to_string(),
    }
}
