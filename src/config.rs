//! Configuration and settings management for gcodekit4.
//!
//! Provides a small serde-backed settings struct covering connection
//! defaults and processor-chain defaults, stored as TOML in a
//! platform-specific directory.

use gcodekit4_core::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Connection protocol type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionType {
    /// Serial/USB connection.
    Serial,
    /// TCP/IP connection.
    Tcp,
}

impl std::fmt::Display for ConnectionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Serial => write!(f, "serial"),
            Self::Tcp => write!(f, "tcp"),
        }
    }
}

/// Connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionSettings {
    /// Connection type to use by default.
    pub connection_type: ConnectionType,
    /// Serial port path or TCP hostname.
    pub port: String,
    /// Baud rate for serial connections.
    pub baud_rate: u32,
    /// TCP port for network connections.
    pub tcp_port: u16,
    /// Connection timeout in milliseconds.
    pub timeout_ms: u64,
    /// Auto-reconnect on connection loss.
    pub auto_reconnect: bool,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            connection_type: ConnectionType::Serial,
            port: "/dev/ttyUSB0".to_string(),
            baud_rate: 115200,
            tcp_port: 8888,
            timeout_ms: 5000,
            auto_reconnect: true,
        }
    }
}

/// Processor-chain defaults used when the CLI builds a chain without an
/// explicit profile.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileProcessingSettings {
    /// Maximum segment length the move splitter will emit, in machine units.
    pub move_splitter_max_length: f64,
    /// How many lines elapse between recovery-file saves.
    pub recovery_save_interval: u32,
    /// Directory the recovery file is written into.
    pub recovery_directory: PathBuf,
}

impl Default for FileProcessingSettings {
    fn default() -> Self {
        Self {
            move_splitter_max_length: 5.0,
            recovery_save_interval: 50,
            recovery_directory: PathBuf::from("."),
        }
    }
}

/// Complete application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Connection settings.
    pub connection: ConnectionSettings,
    /// Processor chain defaults.
    pub file_processing: FileProcessingSettings,
}

impl Config {
    /// Create a new config with defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a config from a TOML file.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::internal(format!("failed to read config file: {e}")))?;
        let config: Self =
            toml::from_str(&content).map_err(|e| Error::internal(format!("invalid config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Save this config as TOML.
    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        self.validate()?;
        let content = toml::to_string_pretty(self)
            .map_err(|e| Error::internal(format!("failed to serialize config: {e}")))?;
        std::fs::write(path, content)
            .map_err(|e| Error::internal(format!("failed to write config file: {e}")))?;
        Ok(())
    }

    /// Validate configuration invariants.
    pub fn validate(&self) -> Result<()> {
        if self.connection.timeout_ms == 0 {
            return Err(Error::invalid_argument("connection timeout must be > 0"));
        }
        if self.connection.baud_rate == 0 {
            return Err(Error::invalid_argument("baud rate must be > 0"));
        }
        if self.file_processing.move_splitter_max_length <= 0.0 {
            return Err(Error::invalid_argument(
                "move_splitter_max_length must be > 0",
            ));
        }
        Ok(())
    }

    /// Platform-specific config directory (`~/.config/gcodekit4` on Linux).
    pub fn config_directory() -> Result<PathBuf> {
        dirs::config_dir()
            .map(|d| d.join("gcodekit4"))
            .ok_or_else(|| Error::internal("could not determine config directory"))
    }

    /// Default config file path.
    pub fn config_file_path() -> Result<PathBuf> {
        Ok(Self::config_directory()?.join("config.toml"))
    }

    /// Ensure the config directory exists, returning its path.
    pub fn ensure_config_dir() -> Result<PathBuf> {
        let dir = Self::config_directory()?;
        std::fs::create_dir_all(&dir)
            .map_err(|e| Error::internal(format!("failed to create config directory: {e}")))?;
        Ok(dir)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_validates() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn round_trips_through_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        let config = Config::new();
        config.save_to_file(&path).unwrap();
        let loaded = Config::load_from_file(&path).unwrap();
        assert_eq!(loaded.connection.baud_rate, config.connection.baud_rate);
    }

    #[test]
    fn rejects_zero_timeout() {
        let mut config = Config::new();
        config.connection.timeout_ms = 0;
        assert!(config.validate().is_err());
    }
}
