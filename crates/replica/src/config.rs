//! Configuration management for the replica node.
//!
//! Settings are loaded from a TOML file (a default file is written when missing) and can
//! be overridden from the command line.

use replica_core::SyncConfig;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::info;

fn default_participants() -> usize {
    3
}

fn default_tick_interval() -> u64 {
    50 // 20 ticks per second
}

fn default_report_interval() -> u64 {
    5
}

/// Application configuration loaded from a TOML file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Simulated room settings
    pub session: SessionSettings,
    /// Synchronization tuning shared by every participant
    #[serde(default)]
    pub sync: SyncConfig,
    /// Logging configuration settings
    pub logging: LoggingSettings,
}

/// Simulated room settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSettings {
    /// Number of participants joining the room
    #[serde(default = "default_participants")]
    pub participants: usize,
    /// Simulation tick interval in milliseconds
    #[serde(default = "default_tick_interval")]
    pub tick_interval_ms: u64,
    /// Leave the room after this many seconds (0 runs until a shutdown signal)
    #[serde(default)]
    pub run_for_secs: u64,
    /// Seconds between convergence reports (0 disables them)
    #[serde(default = "default_report_interval")]
    pub report_interval_secs: u64,
}

/// Logging system configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingSettings {
    /// Log level filter (trace, debug, info, warn, error)
    pub level: String,
    /// Whether to output logs in JSON format
    pub json_format: bool,
    /// Optional file path for log output (None means stdout only)
    pub file_path: Option<String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            session: SessionSettings {
                participants: default_participants(),
                tick_interval_ms: default_tick_interval(),
                run_for_secs: 0,
                report_interval_secs: default_report_interval(),
            },
            sync: SyncConfig::default(),
            logging: LoggingSettings {
                level: "info".to_string(),
                json_format: false,
                file_path: None,
            },
        }
    }
}

impl AppConfig {
    /// Loads configuration from a TOML file.
    ///
    /// If the file doesn't exist, a default configuration file is created at `path` and the
    /// default configuration is returned.
    pub async fn load_from_file(path: &PathBuf) -> Result<Self, Box<dyn std::error::Error>> {
        if path.exists() {
            let content = tokio::fs::read_to_string(path).await?;
            let config: AppConfig = toml::from_str(&content)?;
            Ok(config)
        } else {
            let default_config = AppConfig::default();
            let toml_content = toml::to_string_pretty(&default_config)?;
            tokio::fs::write(path, toml_content).await?;
            info!("Created default configuration file: {}", path.display());
            Ok(default_config)
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.session.participants == 0 {
            return Err("session.participants must be greater than 0".to_string());
        }

        if self.session.tick_interval_ms == 0 {
            return Err("session.tick_interval_ms must be greater than 0".to_string());
        }

        self.sync.validate()?;

        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            return Err(format!(
                "Invalid log level: {}. Must be one of: {valid_levels:?}",
                &self.logging.level
            ));
        }

        Ok(())
    }
}
