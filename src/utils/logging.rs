//! Structured logging setup.
//!
//! The library itself only emits `tracing` events; applications that want the
//! default subscriber call [`init`] once at startup.

use crate::config::LoggingConfig;
use crate::error::{ProtocolError, Result};
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Install a global `fmt` subscriber configured from `config`.
///
/// `RUST_LOG` takes precedence over the configured level. Calling this when a
/// subscriber is already installed returns `ConfigError` and changes nothing.
pub fn init(config: &LoggingConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.log_level.as_str().to_lowercase()));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true);

    let installed = if config.json_format {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
    installed.map_err(|e| ProtocolError::ConfigError(format!("Failed to install logger: {e}")))?;

    info!(app = %config.app_name, level = %config.log_level, "Logging initialized");
    Ok(())
}

/// Like [`init`] but ignores an already-installed subscriber.
pub fn try_init(config: &LoggingConfig) {
    let _ = init(config);
}
