//! TgFleet configuration system.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{FleetError, Result};
use crate::types::RiskSettings;

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FleetConfig {
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub risk: RiskConfig,
    #[serde(default)]
    pub recovery: RecoveryConfig,
    #[serde(default)]
    pub storage: StorageConfig,
}

impl FleetConfig {
    /// Load config from the default path (~/.tgfleet/config.toml).
    pub fn load() -> Result<Self> {
        let path = Self::default_path();
        if path.exists() {
            Self::load_from(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load config from a specific path.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| FleetError::Config(format!("Failed to read config: {e}")))?;
        let mut config: Self = toml::from_str(&content)
            .map_err(|e| FleetError::Config(format!("Failed to parse config: {e}")))?;
        config.normalize();
        Ok(config)
    }

    /// Save config to the given path, creating parent directories.
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)
            .map_err(|e| FleetError::Config(format!("Failed to serialize config: {e}")))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Save config to the default path.
    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::default_path())
    }

    /// Get the default config path.
    pub fn default_path() -> PathBuf {
        Self::home_dir().join("config.toml")
    }

    /// Get the TgFleet home directory.
    pub fn home_dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".tgfleet")
    }

    /// Clamp values that would break the scheduler or risk engine.
    pub fn normalize(&mut self) {
        self.scheduler.normalize();
        let mut defaults = self.risk.default_settings();
        defaults.validate();
        self.risk.max_consecutive_failures = defaults.max_consecutive_failures;
        self.risk.cooling_duration_minutes = defaults.cooling_duration_minutes;
    }
}

/// Dispatch loop and concurrency configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Global ceiling on concurrently running tasks.
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,
    /// Dispatch tick interval.
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,
    /// Upper bound on how long shutdown waits for running tasks.
    #[serde(default = "default_shutdown_timeout_secs")]
    pub shutdown_timeout_secs: u64,
    #[serde(default = "default_drain_poll_interval_ms")]
    pub drain_poll_interval_ms: u64,
}

fn default_max_concurrent() -> usize { 10 }
fn default_tick_interval_ms() -> u64 { 1000 }
fn default_shutdown_timeout_secs() -> u64 { 10 }
fn default_drain_poll_interval_ms() -> u64 { 100 }

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_concurrent: default_max_concurrent(),
            tick_interval_ms: default_tick_interval_ms(),
            shutdown_timeout_secs: default_shutdown_timeout_secs(),
            drain_poll_interval_ms: default_drain_poll_interval_ms(),
        }
    }
}

impl SchedulerConfig {
    /// Clamp the ceiling and replace zero intervals with defaults.
    pub fn normalize(&mut self) {
        self.max_concurrent = self.max_concurrent.clamp(1, 256);
        if self.tick_interval_ms == 0 {
            self.tick_interval_ms = default_tick_interval_ms();
        }
        if self.drain_poll_interval_ms == 0 {
            self.drain_poll_interval_ms = default_drain_poll_interval_ms();
        }
    }

    pub fn tick_interval(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.tick_interval_ms)
    }

    pub fn shutdown_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.shutdown_timeout_secs)
    }

    pub fn drain_poll_interval(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.drain_poll_interval_ms)
    }
}

/// Risk-control defaults and provider error tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskConfig {
    /// Used for users that have no stored risk settings.
    #[serde(default = "default_max_consecutive_failures")]
    pub max_consecutive_failures: u32,
    #[serde(default = "default_cooling_duration_minutes")]
    pub cooling_duration_minutes: u32,
    /// Added on top of the provider-reported flood wait.
    #[serde(default = "default_flood_wait_buffer_secs")]
    pub flood_wait_buffer_secs: i64,
    /// Assumed flood wait when the error text carries no number.
    #[serde(default = "default_flood_wait_secs")]
    pub default_flood_wait_secs: i64,
    /// Age after which a `warning` account is returned to `normal`.
    #[serde(default = "default_warning_recovery_hours")]
    pub warning_recovery_hours: i64,
}

fn default_max_consecutive_failures() -> u32 { RiskSettings::DEFAULT_MAX_CONSECUTIVE_FAILURES }
fn default_cooling_duration_minutes() -> u32 { RiskSettings::DEFAULT_COOLING_DURATION_MINUTES }
fn default_flood_wait_buffer_secs() -> i64 { 60 }
fn default_flood_wait_secs() -> i64 { 300 }
fn default_warning_recovery_hours() -> i64 { 24 }

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            max_consecutive_failures: default_max_consecutive_failures(),
            cooling_duration_minutes: default_cooling_duration_minutes(),
            flood_wait_buffer_secs: default_flood_wait_buffer_secs(),
            default_flood_wait_secs: default_flood_wait_secs(),
            warning_recovery_hours: default_warning_recovery_hours(),
        }
    }
}

impl RiskConfig {
    /// Settings applied to users with nothing configured.
    pub fn default_settings(&self) -> RiskSettings {
        let mut settings = RiskSettings {
            max_consecutive_failures: self.max_consecutive_failures,
            cooling_duration_minutes: self.cooling_duration_minutes,
        };
        settings.validate();
        settings
    }
}

/// Cron expressions for the recovery sweeps.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecoveryConfig {
    #[serde(default = "bool_true")]
    pub enabled: bool,
    #[serde(default = "default_cooling_cron")]
    pub cooling_cron: String,
    #[serde(default = "default_warning_cron")]
    pub warning_cron: String,
    /// How often the daemon checks whether a sweep is due.
    #[serde(default = "default_check_interval_secs")]
    pub check_interval_secs: u64,
}

fn bool_true() -> bool { true }
fn default_cooling_cron() -> String { "*/5 * * * *".into() }
fn default_warning_cron() -> String { "0 * * * *".into() }
fn default_check_interval_secs() -> u64 { 30 }

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            cooling_cron: default_cooling_cron(),
            warning_cron: default_warning_cron(),
            check_interval_secs: default_check_interval_secs(),
        }
    }
}

/// Persistence configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_db_path")]
    pub db_path: String,
}

fn default_db_path() -> String { "~/.tgfleet/fleet.db".into() }

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
        }
    }
}

impl StorageConfig {
    /// Database path with `~` expanded.
    pub fn resolved_db_path(&self) -> PathBuf {
        PathBuf::from(shellexpand::tilde(&self.db_path).to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = FleetConfig::default();
        assert_eq!(config.scheduler.max_concurrent, 10);
        assert_eq!(config.scheduler.tick_interval_ms, 1000);
        assert_eq!(config.scheduler.shutdown_timeout_secs, 10);
        assert_eq!(config.risk.flood_wait_buffer_secs, 60);
        assert_eq!(config.risk.default_flood_wait_secs, 300);
        assert_eq!(config.recovery.cooling_cron, "*/5 * * * *");
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: FleetConfig = toml::from_str(
            r#"
            [scheduler]
            max_concurrent = 4

            [risk]
            cooling_duration_minutes = 90
            "#,
        )
        .unwrap();
        assert_eq!(config.scheduler.max_concurrent, 4);
        assert_eq!(config.scheduler.tick_interval_ms, 1000);
        assert_eq!(config.risk.cooling_duration_minutes, 90);
        assert_eq!(config.risk.max_consecutive_failures, 3);
    }

    #[test]
    fn test_normalize_clamps() {
        let mut config = FleetConfig::default();
        config.scheduler.max_concurrent = 0;
        config.scheduler.tick_interval_ms = 0;
        config.risk.max_consecutive_failures = 1000;
        config.normalize();
        assert_eq!(config.scheduler.max_concurrent, 1);
        assert_eq!(config.scheduler.tick_interval_ms, 1000);
        assert_eq!(
            config.risk.max_consecutive_failures,
            RiskSettings::MAX_CONSECUTIVE_FAILURES_RANGE.1
        );
    }

    #[test]
    fn test_save_and_load_roundtrip() {
        let dir = std::env::temp_dir().join("tgfleet-test-config");
        let path = dir.join("config.toml");
        let mut config = FleetConfig::default();
        config.scheduler.max_concurrent = 7;
        config.save_to(&path).unwrap();

        let loaded = FleetConfig::load_from(&path).unwrap();
        assert_eq!(loaded.scheduler.max_concurrent, 7);
        std::fs::remove_dir_all(&dir).ok();
    }
}
