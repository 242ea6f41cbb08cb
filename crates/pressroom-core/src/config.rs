//! Pressroom configuration system.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{PressroomError, Result};

/// Root configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PressroomConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub publish: PublishConfig,
    #[serde(default)]
    pub notify: NotifyConfig,
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
}

fn default_data_dir() -> String {
    PressroomConfig::home_dir().to_string_lossy().into_owned()
}

impl Default for PressroomConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            scheduler: SchedulerConfig::default(),
            publish: PublishConfig::default(),
            notify: NotifyConfig::default(),
            data_dir: default_data_dir(),
        }
    }
}

impl PressroomConfig {
    /// Load config from the default path (~/.pressroom/config.toml).
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
            .map_err(|e| PressroomError::Config(format!("Failed to read config: {e}")))?;
        let config: Self = toml::from_str(&content)
            .map_err(|e| PressroomError::Config(format!("Failed to parse config: {e}")))?;
        Ok(config)
    }

    /// Save config to a specific path.
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)
            .map_err(|e| PressroomError::Config(format!("Failed to serialize config: {e}")))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Get the default config path.
    pub fn default_path() -> PathBuf {
        Self::home_dir().join("config.toml")
    }

    /// Get the Pressroom home directory.
    pub fn home_dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".pressroom")
    }
}

/// HTTP gateway configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String {
    "127.0.0.1".into()
}
fn default_port() -> u16 {
    8590
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

/// Queue processor and conflict detection tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Seconds between queue poll cycles.
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
    /// Max publish calls in flight per poll cycle.
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
    /// Base delay for exponential retry backoff (seconds).
    #[serde(default = "default_base_retry_delay")]
    pub base_retry_delay_secs: u64,
    /// Cap on a single backoff delay (seconds).
    #[serde(default = "default_max_retry_delay")]
    pub max_retry_delay_secs: u64,
    /// Publish attempts per queue item before it is marked failed.
    #[serde(default = "default_max_attempts")]
    pub default_max_attempts: u32,
    /// Assumed slot length when a schedule carries no explicit duration.
    #[serde(default = "default_duration")]
    pub default_duration_minutes: i64,
}

fn default_poll_interval() -> u64 {
    5
}
fn default_max_concurrency() -> usize {
    4
}
fn default_base_retry_delay() -> u64 {
    30
}
fn default_max_retry_delay() -> u64 {
    3600
}
fn default_max_attempts() -> u32 {
    3
}
fn default_duration() -> i64 {
    60
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval(),
            max_concurrency: default_max_concurrency(),
            base_retry_delay_secs: default_base_retry_delay(),
            max_retry_delay_secs: default_max_retry_delay(),
            default_max_attempts: default_max_attempts(),
            default_duration_minutes: default_duration(),
        }
    }
}

/// Publish collaborator wiring.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PublishConfig {
    /// Webhook endpoint that receives publish requests. Empty = dry-run
    /// publisher that logs and reports success.
    #[serde(default)]
    pub endpoint: String,
    #[serde(default)]
    pub headers: Vec<(String, String)>,
}

/// Notification dispatch wiring.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NotifyConfig {
    /// Webhook URL for workflow notifications. Empty = history only.
    #[serde(default)]
    pub webhook_url: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cfg = PressroomConfig::default();
        assert_eq!(cfg.scheduler.default_max_attempts, 3);
        assert_eq!(cfg.scheduler.default_duration_minutes, 60);
        assert_eq!(cfg.server.port, 8590);
    }

    #[test]
    fn test_toml_round_trip() {
        let dir = std::env::temp_dir().join("pressroom-config-test");
        std::fs::create_dir_all(&dir).ok();
        let path = dir.join("config.toml");

        let mut cfg = PressroomConfig::default();
        cfg.scheduler.poll_interval_secs = 11;
        cfg.save_to(&path).unwrap();

        let loaded = PressroomConfig::load_from(&path).unwrap();
        assert_eq!(loaded.scheduler.poll_interval_secs, 11);
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let cfg: PressroomConfig = toml::from_str("[server]\nport = 9000\n").unwrap();
        assert_eq!(cfg.server.port, 9000);
        assert_eq!(cfg.scheduler.max_concurrency, 4);
    }
}
