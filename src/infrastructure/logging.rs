//! Logging system configuration and initialization
//!
//! Provides the tracing setup for the long-running pipeline:
//! - Console output with an env-filter built from the config
//! - Optional non-blocking file output under the data directory
//! - Optional JSON formatting for log shipping

#![allow(clippy::uninlined_format_args)]

use anyhow::{Context, Result};
use lazy_static::lazy_static;
use std::path::PathBuf;
use std::sync::Mutex;
use tracing_subscriber::{
    fmt,
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter, Layer, Registry,
};

pub use crate::infrastructure::config::LoggingConfig;

// Keep the non-blocking writer guards alive for the process lifetime
lazy_static! {
    static ref LOG_GUARDS: Mutex<Vec<tracing_appender::non_blocking::WorkerGuard>> =
        Mutex::new(Vec::new());
}

/// Log directory under the platform data dir
pub fn get_log_directory() -> PathBuf {
    super::config::ConfigManager::get_app_data_dir()
        .map(|dir| dir.join("logs"))
        .unwrap_or_else(|_| PathBuf::from("logs"))
}

/// Initialize the logging system with default configuration
pub fn init_logging() -> Result<()> {
    init_logging_with_config(&LoggingConfig::default())
}

/// Initialize the logging system from a `LoggingConfig`.
///
/// `RUST_LOG` overrides the configured levels when set.
pub fn init_logging_with_config(config: &LoggingConfig) -> Result<()> {
    let filter = build_env_filter(config)?;

    let console_layer = if config.console_output {
        Some(fmt::layer().with_target(true))
    } else {
        None
    };

    let file_layer = if config.file_output {
        let log_dir = get_log_directory();
        std::fs::create_dir_all(&log_dir)
            .with_context(|| format!("Failed to create log directory: {}", log_dir.display()))?;

        let appender = tracing_appender::rolling::daily(&log_dir, "car-scout.log");
        let (writer, guard) = tracing_appender::non_blocking(appender);
        LOG_GUARDS
            .lock()
            .expect("log guard store poisoned")
            .push(guard);

        if config.json_format {
            Some(fmt::layer().json().with_writer(writer).with_ansi(false).boxed())
        } else {
            Some(fmt::layer().with_writer(writer).with_ansi(false).boxed())
        }
    } else {
        None
    };

    Registry::default()
        .with(filter)
        .with(console_layer)
        .with(file_layer)
        .try_init()
        .context("Failed to initialize tracing subscriber")?;

    tracing::info!("Logging initialized (level: {})", config.level);
    Ok(())
}

fn build_env_filter(config: &LoggingConfig) -> Result<EnvFilter> {
    if std::env::var("RUST_LOG").is_ok() {
        return EnvFilter::try_from_default_env().context("Invalid RUST_LOG filter");
    }

    let mut directives = vec![config.level.clone()];
    for (module, level) in &config.module_filters {
        directives.push(format!("{}={}", module, level));
    }

    EnvFilter::try_new(directives.join(","))
        .with_context(|| format!("Invalid log filter built from config: {:?}", directives))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filter_builds_from_config_levels() {
        let config = LoggingConfig::default();
        let filter = build_env_filter(&config);
        assert!(filter.is_ok());
    }
}
