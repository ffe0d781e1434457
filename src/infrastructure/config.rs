//! Configuration infrastructure
//!
//! Loading and management of the pipeline configuration file.
//!
//! Configuration is organized into two tiers:
//! 1. User-configurable settings (acceptance rules, schedule, recipients)
//! 2. Hidden/Advanced settings (pacing, retries, selectors, database path)

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tokio::fs;
use tracing::info;

use crate::domain::rules::AcceptanceRules;
use crate::domain::score::ScoringConfig;
use crate::infrastructure::parsing::config::ParsingConfig;

/// Complete application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// User-configurable settings
    pub user: UserConfig,

    /// Hidden/Advanced settings (config file only)
    pub advanced: AdvancedConfig,
}

/// Settings an operator is expected to edit
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UserConfig {
    /// Domain acceptance rules applied to every extracted record
    pub rules: AcceptanceRules,

    /// Search crawl settings
    pub search: SearchConfig,

    /// Run-loop schedule
    pub schedule: ScheduleConfig,

    /// Notification fan-out
    pub notifications: NotificationConfig,

    /// Geocoding and distance
    pub geocode: GeocodeConfig,

    /// Desirability scoring caps and weights
    pub scoring: ScoringConfig,

    /// Logging configuration
    pub logging: LoggingConfig,
}

/// Search crawl settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchConfig {
    /// Search-results URL with `{page}` placeholder for the page number
    pub search_url_template: String,

    /// Base URL for resolving relative links found on pages
    pub base_url: String,

    /// Hard cap on pages visited per crawl cycle
    pub max_pages: u32,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            search_url_template: "https://marketplace.example/search?page={page}".to_string(),
            base_url: "https://marketplace.example".to_string(),
            max_pages: 20,
        }
    }
}

/// Run-loop schedule settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleConfig {
    /// Minutes between the start of consecutive crawl cycles
    pub crawl_interval_minutes: u64,

    /// First hour (local time) of the night window, inclusive
    pub night_start_hour: u32,

    /// First hour (local time) after the night window, exclusive
    pub night_end_hour: u32,

    /// Minutes between availability re-verification passes
    pub verify_interval_minutes: u64,

    /// Maximum records re-verified per pass
    pub verify_batch_size: u32,

    /// Sleep increment used while idle or night-paused, seconds.
    /// The cancellation signal is checked at every increment.
    pub sleep_increment_seconds: u64,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            crawl_interval_minutes: 15,
            night_start_hour: 22,
            night_end_hour: 7,
            verify_interval_minutes: 180,
            verify_batch_size: 25,
            sleep_increment_seconds: 30,
        }
    }
}

impl ScheduleConfig {
    /// Whether `hour` falls inside the night window. Handles windows that
    /// wrap around midnight (e.g. 22 → 7).
    pub fn is_night_hour(&self, hour: u32) -> bool {
        if self.night_start_hour == self.night_end_hour {
            return false;
        }
        if self.night_start_hour < self.night_end_hour {
            (self.night_start_hour..self.night_end_hour).contains(&hour)
        } else {
            hour >= self.night_start_hour || hour < self.night_end_hour
        }
    }
}

/// Notification fan-out settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationConfig {
    /// Bot API token
    pub bot_token: String,

    /// Recipient chat ids for per-listing notifications and the daily digest
    pub recipients: Vec<i64>,

    /// Optional operator chat id for batch/fatal failure alerts
    pub operator_recipient: Option<i64>,

    /// Above this many accepted records per cycle, a single summary notice
    /// replaces per-item delivery
    pub volume_guard_threshold: usize,

    /// Send an individual notice when a listing is detected withdrawn
    pub notify_withdrawals: bool,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            bot_token: String::new(),
            recipients: Vec::new(),
            operator_recipient: None,
            volume_guard_threshold: 10,
            notify_withdrawals: true,
        }
    }
}

/// Geocoding settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeocodeConfig {
    /// Provider search endpoint (Nominatim-compatible)
    pub endpoint: String,

    /// User agent sent to the provider
    pub user_agent: String,

    /// Free-text query for the fixed reference point; geocoded once and cached
    pub reference_query: String,

    /// Minimum delay between provider calls, process-wide
    pub min_interval_ms: u64,

    /// Bounded retry count on transient lookup failure
    pub max_retries: u32,
}

impl Default for GeocodeConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://nominatim.openstreetmap.org/search".to_string(),
            user_agent: "car-scout/0.2 (listing monitor)".to_string(),
            reference_query: "20147 Milano".to_string(),
            min_interval_ms: 1100,
            max_retries: 2,
        }
    }
}

/// Logging configuration settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level: "error", "warn", "info", "debug", "trace"
    pub level: String,

    /// Enable JSON formatted logs
    pub json_format: bool,

    /// Enable console output
    pub console_output: bool,

    /// Enable file output
    pub file_output: bool,

    /// Module-specific log level filters (e.g., "sqlx": "warn")
    pub module_filters: std::collections::HashMap<String, String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json_format: false,
            console_output: true,
            file_output: true,
            module_filters: {
                let mut filters = std::collections::HashMap::new();
                filters.insert("sqlx".to_string(), "warn".to_string());
                filters.insert("reqwest".to_string(), "info".to_string());
                filters.insert("hyper".to_string(), "warn".to_string());
                filters.insert("car_scout".to_string(), "info".to_string());
                filters
            },
        }
    }
}

/// Hidden/Advanced settings that are in the config file but rarely touched
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdvancedConfig {
    /// Maximum requests per second against the marketplace
    pub max_requests_per_second: u32,

    /// Timeout for HTTP requests in seconds
    pub request_timeout_seconds: u64,

    /// Retry attempts for failed page fetches
    pub retry_attempts: u32,

    /// Retry delay in milliseconds
    pub retry_delay_ms: u64,

    /// Rows per statement in CDC batch upserts
    pub db_batch_size: usize,

    /// Maximum bisection depth when a persistence chunk fails
    pub batch_bisection_depth: u32,

    /// Database file path; `None` uses the platform data directory
    pub database_path: Option<PathBuf>,

    /// CSS selector sets for the marketplace pages
    pub parsing: ParsingConfig,
}

impl Default for AdvancedConfig {
    fn default() -> Self {
        Self {
            max_requests_per_second: 2,
            request_timeout_seconds: 30,
            retry_attempts: 3,
            retry_delay_ms: 2000,
            db_batch_size: 50,
            batch_bisection_depth: 4,
            database_path: None,
            parsing: ParsingConfig::default(),
        }
    }
}

/// Loads and persists the configuration file
pub struct ConfigManager {
    config_path: PathBuf,
}

impl ConfigManager {
    /// Platform config directory for this application
    pub fn get_config_dir() -> Result<PathBuf> {
        let base = dirs::config_dir().context("Could not determine config directory")?;
        Ok(base.join("car-scout"))
    }

    /// Platform data directory (database, logs)
    pub fn get_app_data_dir() -> Result<PathBuf> {
        let base = dirs::data_dir().context("Could not determine data directory")?;
        Ok(base.join("car-scout"))
    }

    pub fn new() -> Result<Self> {
        let config_path = Self::get_config_dir()?.join("config.json");
        Ok(Self { config_path })
    }

    /// Manager bound to an explicit config file path
    pub fn with_path(config_path: PathBuf) -> Self {
        Self { config_path }
    }

    pub fn config_path(&self) -> &PathBuf {
        &self.config_path
    }

    /// Load the configuration, writing a default file on first run
    pub async fn load_config(&self) -> Result<AppConfig> {
        if !self.config_path.exists() {
            info!(
                "No configuration found, creating default at {}",
                self.config_path.display()
            );
            let config = AppConfig::default();
            self.save_config(&config).await?;
            return Ok(config);
        }

        let content = fs::read_to_string(&self.config_path)
            .await
            .with_context(|| format!("Failed to read config file: {}", self.config_path.display()))?;

        let config: AppConfig = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", self.config_path.display()))?;

        Ok(config)
    }

    /// Persist the configuration (pretty-printed for hand editing)
    pub async fn save_config(&self, config: &AppConfig) -> Result<()> {
        if let Some(parent) = self.config_path.parent() {
            fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create config directory: {}", parent.display()))?;
        }

        let content =
            serde_json::to_string_pretty(config).context("Failed to serialize configuration")?;

        fs::write(&self.config_path, content)
            .await
            .with_context(|| format!("Failed to write config file: {}", self.config_path.display()))?;

        Ok(())
    }
}
