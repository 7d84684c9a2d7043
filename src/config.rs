//! Client settings.
//!
//! This module handles loading, saving, and validating the client's own
//! settings file. The device options edited by the user live on the device
//! and are handled by the options model, not here.

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Client settings.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct ClientConfig {
    /// Base URL of the device web server.
    pub device_url: String,
    pub canvas_width: u32,
    pub canvas_height: u32,
    /// Rows reserved for the frequency label; strength 0 is drawn here.
    pub header_height: u32,
    /// Strength drawn at the bottom edge of the canvas.
    pub strength_floor: f64,
    /// Minimum spacing between status polls.
    pub poll_floor_ms: u64,
    pub request_timeout_ms: u64,
    /// Where the composed display is written; defaults under the data dir.
    pub frame_path: Option<PathBuf>,
    pub control_socket: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            device_url: "http://127.0.0.1:8080".to_string(),
            canvas_width: 400,
            canvas_height: 200,
            header_height: 21,
            strength_floor: -50.0,
            poll_floor_ms: 500,
            request_timeout_ms: 5000,
            frame_path: None,
            control_socket: "/tmp/ghostbox-client.sock".to_string(),
        }
    }
}

impl ClientConfig {
    /// Validate configuration values.
    /// Returns Ok(()) if valid, Err with descriptive message if invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.device_url.starts_with("http://") || self.device_url.starts_with("https://")) {
            return Err(ConfigError::ValidationError(format!(
                "device_url ({}) must be an http(s) URL",
                self.device_url
            )));
        }

        if self.canvas_width == 0 || self.canvas_height == 0 {
            return Err(ConfigError::ValidationError(format!(
                "canvas size ({}x{}) must not be empty",
                self.canvas_width, self.canvas_height
            )));
        }

        if self.header_height >= self.canvas_height {
            return Err(ConfigError::ValidationError(format!(
                "header_height ({}) must be less than canvas_height ({})",
                self.header_height, self.canvas_height
            )));
        }

        if !(self.strength_floor.is_finite() && self.strength_floor < 0.0) {
            return Err(ConfigError::ValidationError(format!(
                "strength_floor ({}) must be negative",
                self.strength_floor
            )));
        }

        if self.poll_floor_ms == 0 {
            return Err(ConfigError::ValidationError(
                "poll_floor_ms must be at least 1ms".to_string(),
            ));
        }

        Ok(())
    }

    /// Load configuration from file or use defaults.
    /// If the file doesn't exist, returns the default config.
    pub fn load_or_default(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(path)
            .map_err(|e| ConfigError::ParseError(format!("Failed to read settings file: {}", e)))?;

        let config: ClientConfig = serde_json::from_str(&contents)
            .map_err(|e| ConfigError::ParseError(format!("Invalid JSON: {}", e)))?;

        config.validate()?;
        Ok(config)
    }

    /// Save configuration to file using atomic write.
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let temp_path = path.with_extension("json.tmp");
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| ConfigError::ParseError(format!("Failed to serialize settings: {}", e)))?;

        {
            let mut file = fs::File::create(&temp_path)?;
            file.write_all(json.as_bytes())?;
            file.sync_all()?;
        }

        fs::rename(&temp_path, path)?;
        Ok(())
    }

    pub fn poll_floor(&self) -> Duration {
        Duration::from_millis(self.poll_floor_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// Output path for the composed display.
    pub fn frame_path(&self) -> PathBuf {
        self.frame_path
            .clone()
            .unwrap_or_else(|| data_dir().join("display.png"))
    }

    /// Get the default settings path (<config dir>/ghostbox/client.json).
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(std::env::temp_dir)
            .join("ghostbox")
            .join("client.json")
    }
}

/// Directory for logs and the display frame.
pub fn data_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("ghostbox")
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use tempfile::tempdir;

    #[test]
    fn test_config_default() {
        let config = ClientConfig::default();
        assert_eq!(config.canvas_width, 400);
        assert_eq!(config.header_height, 21);
        assert_eq!(config.strength_floor, -50.0);
        assert_eq!(config.poll_floor(), Duration::from_millis(500));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_nonexistent() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nonexistent.json");

        let config = ClientConfig::load_or_default(&path).unwrap();
        assert_eq!(config, ClientConfig::default());
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("ghostbox").join("client.json");

        let config = ClientConfig {
            device_url: "http://ghostbox.local".to_string(),
            canvas_width: 640,
            frame_path: Some(dir.path().join("frame.png")),
            ..ClientConfig::default()
        };
        config.save(&path).unwrap();
        assert!(!path.with_extension("json.tmp").exists());

        let loaded = ClientConfig::load_or_default(&path).unwrap();
        assert_eq!(loaded, config);
        assert_eq!(loaded.frame_path(), dir.path().join("frame.png"));
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("client.json");
        fs::write(&path, r#"{"device_url": "http://10.0.0.7"}"#).unwrap();

        let loaded = ClientConfig::load_or_default(&path).unwrap();
        assert_eq!(loaded.device_url, "http://10.0.0.7");
        assert_eq!(loaded.canvas_height, 200);
    }

    #[test]
    fn test_invalid_json() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("client.json");
        fs::write(&path, "{not json").unwrap();

        let result = ClientConfig::load_or_default(&path);
        assert!(matches!(result, Err(ConfigError::ParseError(_))));
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let cases = [
            ClientConfig {
                device_url: "ftp://device".to_string(),
                ..ClientConfig::default()
            },
            ClientConfig {
                canvas_width: 0,
                ..ClientConfig::default()
            },
            ClientConfig {
                header_height: 200,
                ..ClientConfig::default()
            },
            ClientConfig {
                strength_floor: 0.0,
                ..ClientConfig::default()
            },
            ClientConfig {
                poll_floor_ms: 0,
                ..ClientConfig::default()
            },
        ];

        for config in cases {
            assert!(
                matches!(config.validate(), Err(ConfigError::ValidationError(_))),
                "{:?} should be rejected",
                config
            );
        }
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        #[test]
        fn prop_header_must_fit_canvas(height in 1u32..1000, header in 0u32..1000) {
            let config = ClientConfig {
                canvas_height: height,
                header_height: header,
                ..ClientConfig::default()
            };
            prop_assert_eq!(config.validate().is_ok(), header < height);
        }
    }
}
