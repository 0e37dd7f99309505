use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Client tunables, loaded from TOML or constructed with defaults.
///
/// Durations are stored as integer seconds so the file stays hand-editable.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Base URL of the auth and message HTTP API.
    pub api_url: String,
    /// Realtime gateway endpoint. The authenticated identity is appended
    /// as a query parameter when connecting.
    pub realtime_url: String,
    /// Lifetime of a persisted session record.
    pub session_duration_secs: u64,
    /// Inactivity window after which the session is expired locally.
    pub inactivity_timeout_secs: u64,
    /// How often the idle monitor re-evaluates the session.
    pub idle_check_interval_secs: u64,
    /// Interval for the scheduled proactive credential refresh.
    pub proactive_refresh_interval_secs: u64,
    /// First reconnect backoff delay.
    pub reconnect_base_delay_secs: u64,
    /// Upper bound on the reconnect backoff delay.
    pub reconnect_max_delay_secs: u64,
    /// Reconnect attempts before the connection settles disconnected and
    /// waits for an explicit reconnect trigger.
    pub max_reconnect_attempts: u32,
    /// How long an outbound send waits for its realtime acknowledgment
    /// before falling back to the HTTP path.
    pub ack_deadline_secs: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_url: "http://127.0.0.1:8080".to_string(),
            realtime_url: "ws://127.0.0.1:8080/realtime".to_string(),
            session_duration_secs: 7 * 24 * 60 * 60,
            inactivity_timeout_secs: 30 * 60,
            idle_check_interval_secs: 60,
            proactive_refresh_interval_secs: 20 * 60,
            reconnect_base_delay_secs: 1,
            reconnect_max_delay_secs: 60,
            max_reconnect_attempts: 8,
            ack_deadline_secs: 10,
        }
    }
}

impl ClientConfig {
    /// Load config from a TOML file path. Returns None if the file doesn't exist.
    pub fn load(path: &std::path::Path) -> Result<Option<Self>, ConfigError> {
        if !path.exists() {
            return Ok(None);
        }
        let contents = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::ReadFailed(path.to_path_buf(), e))?;
        let config: Self = toml::from_str(&contents)
            .map_err(|e| ConfigError::ParseFailed(path.to_path_buf(), e))?;
        Ok(Some(config))
    }

    /// Save config to a TOML file path.
    pub fn save(&self, path: &std::path::Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| ConfigError::WriteFailed(path.to_path_buf(), e))?;
        }
        let contents = toml::to_string_pretty(self).map_err(ConfigError::SerializeFailed)?;
        std::fs::write(path, contents)
            .map_err(|e| ConfigError::WriteFailed(path.to_path_buf(), e))?;
        Ok(())
    }

    pub fn session_duration(&self) -> Duration {
        Duration::from_secs(self.session_duration_secs)
    }

    pub fn inactivity_timeout(&self) -> Duration {
        Duration::from_secs(self.inactivity_timeout_secs)
    }

    pub fn idle_check_interval(&self) -> Duration {
        Duration::from_secs(self.idle_check_interval_secs)
    }

    pub fn proactive_refresh_interval(&self) -> Duration {
        Duration::from_secs(self.proactive_refresh_interval_secs)
    }

    pub fn reconnect_base_delay(&self) -> Duration {
        Duration::from_secs(self.reconnect_base_delay_secs)
    }

    pub fn reconnect_max_delay(&self) -> Duration {
        Duration::from_secs(self.reconnect_max_delay_secs)
    }

    pub fn ack_deadline(&self) -> Duration {
        Duration::from_secs(self.ack_deadline_secs)
    }
}

/// Errors that can occur when loading or saving config.
#[derive(Debug)]
pub enum ConfigError {
    ReadFailed(std::path::PathBuf, std::io::Error),
    ParseFailed(std::path::PathBuf, toml::de::Error),
    WriteFailed(std::path::PathBuf, std::io::Error),
    SerializeFailed(toml::ser::Error),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ReadFailed(path, e) => {
                write!(f, "Failed to read config {}: {}", path.display(), e)
            }
            Self::ParseFailed(path, e) => {
                write!(f, "Failed to parse config {}: {}", path.display(), e)
            }
            Self::WriteFailed(path, e) => {
                write!(f, "Failed to write config {}: {}", path.display(), e)
            }
            Self::SerializeFailed(e) => write!(f, "Failed to serialize config: {}", e),
        }
    }
}

impl std::error::Error for ConfigError {}
