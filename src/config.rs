//! Configuration for the Neurocalm agent.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Default baud rate of the ESP32/Arduino sensor firmware.
pub const DEFAULT_BAUD_RATE: u32 = 115_200;

/// Main configuration for the agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Serial link to the sensor board
    pub serial: SerialConfig,

    /// Tick period of the simulated sensor
    #[serde(with = "duration_ms")]
    pub simulation_period: Duration,

    /// How long a beat indicator stays lit
    #[serde(with = "duration_ms")]
    pub beat_pulse: Duration,

    /// Number of BPM samples kept for charting (capped at 30)
    pub window_capacity: usize,

    /// Longest partial record accepted before the session fails (0 disables the guard)
    pub max_record_len: usize,

    /// Alert throttling
    pub alerts: AlertConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            serial: SerialConfig::default(),
            simulation_period: Duration::from_millis(1000),
            beat_pulse: Duration::from_millis(150),
            window_capacity: 30,
            max_record_len: 4096,
            alerts: AlertConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from the default location.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(&Self::config_path())
    }

    /// Load configuration from a specific file, falling back to defaults if it is absent.
    pub fn load_from(path: &std::path::Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&content).map_err(ConfigError::Parse)?;
        Ok(config)
    }

    /// Save configuration to the default location.
    pub fn save(&self) -> Result<(), ConfigError> {
        self.save_to(&Self::config_path())
    }

    /// Save configuration to a specific file.
    pub fn save_to(&self, path: &std::path::Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = serde_json::to_string_pretty(self).map_err(ConfigError::Serialize)?;
        std::fs::write(path, content)?;

        Ok(())
    }

    /// Get the path to the configuration file.
    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("neurocalm-agent")
            .join("config.json")
    }

    /// Record length guard for the line framer, `None` when disabled.
    pub fn record_limit(&self) -> Option<usize> {
        (self.max_record_len > 0).then_some(self.max_record_len)
    }
}

/// Serial link settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SerialConfig {
    /// Device path, e.g. `/dev/ttyUSB0` or `COM3`
    pub port: Option<String>,
    pub baud_rate: u32,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            port: None,
            baud_rate: DEFAULT_BAUD_RATE,
        }
    }
}

/// Timing of the two alert timescales.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertConfig {
    /// Continuous high-stress time before a nudge fires
    #[serde(with = "duration_ms")]
    pub sustain_threshold: Duration,

    /// Minimum spacing between notifications
    #[serde(with = "duration_ms")]
    pub notify_cooldown: Duration,
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            sustain_threshold: Duration::from_secs(5),
            notify_cooldown: Duration::from_secs(60),
        }
    }
}

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Parse error: {0}")]
    Parse(serde_json::Error),
    #[error("Serialize error: {0}")]
    Serialize(serde_json::Error),
}

/// Serde support for Duration as whole milliseconds.
mod duration_ms {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        (duration.as_millis() as u64).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}
