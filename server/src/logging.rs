//! Structured logging initialization.
//!
//! Configures the tracing subscriber for the demo binary and embedders that
//! do not bring their own. The `RUST_LOG` environment variable takes
//! precedence over the configured level.

use crate::config::{LogFormat, LoggingConfig};
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

/// Initialize the logging subsystem.
///
/// # Example
///
/// ```ignore
/// use riffle::config::LoggingConfig;
///
/// riffle::logging::init(&LoggingConfig::default());
/// tracing::info!("engine starting");
/// ```
pub fn init(config: &LoggingConfig) {
    let filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        EnvFilter::new(&config.level)
    };

    match config.format {
        LogFormat::Compact => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().compact().with_thread_names(true))
                .init();
        }
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().json().with_thread_names(true))
                .init();
        }
    }
}
