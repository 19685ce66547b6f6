//! Logging setup
//!
//! `RUST_LOG` takes precedence when set; otherwise the configured level applies
//! to every target.

use std::str::FromStr;

use tracing::Level;
use tracing_subscriber::{fmt, EnvFilter};

use crate::config::LogConfig;
use crate::error::{CallCenterError, Result};

/// Parse a log level name such as `info` or `DEBUG`
pub fn parse_log_level(level: &str) -> Result<Level> {
    Level::from_str(level.trim())
        .map_err(|_| CallCenterError::config(format!("Invalid log level: {level}")))
}

/// Build the filter: `RUST_LOG` wins, otherwise the configured level
pub fn env_filter(config: &LogConfig) -> Result<EnvFilter> {
    let level = parse_log_level(&config.level)?;
    Ok(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.as_str())))
}

/// Install the global subscriber
///
/// Calling this twice is harmless; the second subscriber is simply not installed.
pub fn init_logging(config: &LogConfig) -> Result<()> {
    let filter = env_filter(config)?;
    let builder = fmt::Subscriber::builder()
        .with_env_filter(filter)
        .with_target(true);

    let installed = if config.json {
        builder.json().with_writer(std::io::stdout).try_init()
    } else {
        builder.try_init()
    };
    if installed.is_err() {
        tracing::debug!("Global subscriber already installed");
    }
    Ok(())
}

/// Log a startup banner with version info
pub fn log_welcome(app_name: &str, version: &str) {
    tracing::info!("Starting {} v{}", app_name, version);
}
