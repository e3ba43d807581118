// CLI configuration
//
// Stored as JSON in <config_dir>/sensesafe/config.json (e.g. ~/.config/sensesafe/config.json).
// Missing fields take their defaults; a missing file is created with defaults.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// SenseSafe backend base URL
    pub base_url: String,

    /// Cookie name the session token is sent back under
    pub cookie_name: String,

    /// HTTP request timeout in seconds
    pub request_timeout_secs: u64,

    /// Location report period in seconds
    pub report_interval_secs: u64,

    /// Persisted key-value store (session token); defaults to the data dir
    pub storage_path: Option<PathBuf>,

    /// Reporter status snapshot, written after every tick when set
    pub status_path: Option<PathBuf>,

    /// Report this position instead of asking termux-location
    pub fixed_position: Option<FixedPosition>,

    /// Port for `sensesafe view`
    pub map_port: u16,

    /// Map refresh period in seconds
    pub map_refresh_secs: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FixedPosition {
    pub latitude: f64,
    pub longitude: f64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:3000".to_string(),
            cookie_name: "token".to_string(),
            request_timeout_secs: 30,
            report_interval_secs: 60,
            storage_path: None,
            status_path: None,
            fixed_position: None,
            map_port: 8081,
            map_refresh_secs: 10,
        }
    }
}

impl Config {
    /// Get the config directory path (cross-platform)
    pub fn config_dir() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .context("Failed to determine config directory")?
            .join("sensesafe");

        std::fs::create_dir_all(&config_dir).context("Failed to create config directory")?;

        Ok(config_dir)
    }

    /// Get the data directory path (cross-platform)
    pub fn data_dir() -> Result<PathBuf> {
        let data_dir = dirs::data_local_dir()
            .context("Failed to determine data directory")?
            .join("sensesafe");

        std::fs::create_dir_all(&data_dir).context("Failed to create data directory")?;

        Ok(data_dir)
    }

    pub fn default_config_file() -> Result<PathBuf> {
        Ok(Self::config_dir()?.join("config.json"))
    }

    /// Load config from `path`, or create it with defaults if it does not exist
    pub fn load_from(path: &Path) -> Result<Self> {
        if path.exists() {
            let contents = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file {}", path.display()))?;
            let config: Config = serde_json::from_str(&contents)
                .with_context(|| format!("Failed to parse config file {}", path.display()))?;
            Ok(config)
        } else {
            let config = Config::default();
            config.save_to(path)?;
            Ok(config)
        }
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).context("Failed to create config directory")?;
        }
        let contents = serde_json::to_string_pretty(self).context("Failed to serialize config")?;
        std::fs::write(path, contents).context("Failed to write config file")?;
        Ok(())
    }

    /// Session store location, `<data_dir>/storage.json` unless configured
    pub fn storage_file(&self) -> Result<PathBuf> {
        match &self.storage_path {
            Some(path) => Ok(path.clone()),
            None => Ok(Self::data_dir()?.join("storage.json")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_is_created_with_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.json");

        let config = Config::load_from(&path).unwrap();
        assert_eq!(config, Config::default());
        assert!(path.exists());
        assert_eq!(Config::load_from(&path).unwrap(), config);
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(
            &path,
            r#"{"base_url": "http://192.168.15.8:3000", "fixed_position": {"latitude": -23.5, "longitude": -46.6}}"#,
        )
        .unwrap();

        let config = Config::load_from(&path).unwrap();
        assert_eq!(config.base_url, "http://192.168.15.8:3000");
        assert_eq!(config.cookie_name, "token");
        assert_eq!(config.report_interval_secs, 60);
        assert_eq!(
            config.fixed_position,
            Some(FixedPosition {
                latitude: -23.5,
                longitude: -46.6
            })
        );
    }

    #[test]
    fn test_invalid_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, "{not json").unwrap();
        assert!(Config::load_from(&path).is_err());
    }

    #[test]
    fn test_configured_storage_path() {
        let config = Config {
            storage_path: Some(PathBuf::from("/tmp/sensesafe.json")),
            ..Default::default()
        };
        assert_eq!(config.storage_file().unwrap(), PathBuf::from("/tmp/sensesafe.json"));
    }
}
