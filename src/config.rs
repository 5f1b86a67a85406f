//! Client configuration

use crate::{Error, Result};
use serde::{Deserialize, Serialize};

/// Configuration for the chat subsystem
///
/// Persistent configuration for the sync client. Stored in JSON format and
/// loaded/saved from disk; a missing or empty file yields defaults.
///
/// # Example
/// ```rust,no_run
/// use roomsync::config::Config;
///
/// // Load config (returns default if file doesn't exist)
/// let mut config = Config::load("roomsync.json").expect("Failed to load");
///
/// config.api_base_url = "https://api.example.com".to_string();
/// config.save("roomsync.json").expect("Failed to save");
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Base URL of the chat REST API
    pub api_base_url: String,
    /// Host and port of the realtime socket endpoint (e.g., "chat.example.com:9000")
    pub socket_addr: String,
    /// Path to the local message database file
    pub database_path: String,
    /// Base delay for socket reconnect backoff in milliseconds
    pub reconnect_base_delay_ms: u64,
    /// Maximum delay between socket reconnect attempts in milliseconds
    pub reconnect_max_delay_ms: u64,
    /// Capacity of the realtime event channel
    pub event_buffer: usize,
}

impl Config {
    /// Load configuration from a JSON file
    ///
    /// # Arguments
    /// * `path` - Path to the config file
    ///
    /// # Returns
    /// The loaded configuration, or defaults if the file doesn't exist
    pub fn load<P: AsRef<std::path::Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            return Ok(Self::default());
        }

        let data = std::fs::read_to_string(path)
            .map_err(|e| Error::Storage(format!("Failed to read config: {}", e)))?;

        // Handle empty file (return defaults)
        if data.trim().is_empty() {
            return Ok(Self::default());
        }

        let config: Self = serde_json::from_str(&data)
            .map_err(|e| Error::Storage(format!("Failed to parse config: {}", e)))?;

        Ok(config)
    }

    /// Save configuration to a JSON file
    ///
    /// # Arguments
    /// * `path` - Path to save the config file
    pub fn save<P: AsRef<std::path::Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| Error::Storage(format!("Failed to create config directory: {}", e)))?;
        }

        let json = serde_json::to_string_pretty(self)
            .map_err(|e| Error::Storage(format!("Failed to serialize config: {}", e)))?;

        std::fs::write(path, json)
            .map_err(|e| Error::Storage(format!("Failed to write config: {}", e)))?;

        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_base_url: "http://localhost:8080".to_string(),
            socket_addr: "localhost:9000".to_string(),
            database_path: "./data/roomsync.db".to_string(),
            reconnect_base_delay_ms: 500,
            reconnect_max_delay_ms: 30_000, // 30 seconds
            event_buffer: 64,
        }
    }
}
