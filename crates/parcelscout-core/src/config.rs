use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Env var overriding the tracking service URL
pub const API_URL_ENV: &str = "PARCELSCOUT_API_URL";

/// Main configuration structure
///
/// This gets loaded from config file, env vars, and CLI args.
/// Priority: CLI > Env > File > Defaults
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct Config {
    #[serde(default)]
    pub service: ServiceConfig,
    #[serde(default)]
    pub refresh: RefreshConfig,
    #[serde(default)]
    pub storage: StorageConfig,
}

impl Config {
    /// Load config from the default location, defaults if there is none.
    /// Environment overrides are applied on top.
    pub fn load() -> crate::Result<Self> {
        let mut config = Self::load_from(&Self::config_path()?)?;
        config.apply_env();
        Ok(config)
    }

    /// Load from a specific file; a missing file means defaults
    pub fn load_from(path: &Path) -> crate::Result<Self> {
        if path.exists() {
            let contents = std::fs::read_to_string(path)?;
            let config: Config = toml::from_str(&contents)
                .map_err(|e| crate::Error::ConfigError(format!("Failed to parse config: {}", e)))?;
            Ok(config)
        } else {
            Ok(Self::default())
        }
    }

    /// Save config to the default location
    pub fn save(&self) -> crate::Result<()> {
        self.save_to(&Self::config_path()?)
    }

    pub fn save_to(&self, path: &Path) -> crate::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let contents = toml::to_string_pretty(self)
            .map_err(|e| crate::Error::ConfigError(format!("Failed to serialize config: {}", e)))?;

        std::fs::write(path, contents)?;
        Ok(())
    }

    fn apply_env(&mut self) {
        if let Ok(url) = std::env::var(API_URL_ENV) {
            if !url.trim().is_empty() {
                self.service.base_url = url;
            }
        }
    }

    /// Where the package database lives unless the config says otherwise
    pub fn database_path(&self) -> crate::Result<PathBuf> {
        match &self.storage.path {
            Some(path) => Ok(path.clone()),
            None => Ok(dirs::data_dir()
                .ok_or_else(|| crate::Error::ConfigError("Could not find data directory".into()))?
                .join("parcelscout")
                .join("state.db")),
        }
    }

    /// Get the config file path
    /// Uses XDG on Linux/macOS, AppData on Windows
    pub fn config_path() -> crate::Result<PathBuf> {
        Ok(dirs::config_dir()
            .ok_or_else(|| crate::Error::ConfigError("Could not find config directory".into()))?
            .join("parcelscout")
            .join("config.toml"))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServiceConfig {
    /// Base URL of the tracking service, `/track` and `/detect` hang off it
    #[serde(default = "default_base_url")]
    pub base_url: String,
}

fn default_base_url() -> String {
    parcelscout_api::DEFAULT_BASE_URL.to_string()
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RefreshConfig {
    /// Seconds between automatic bulk refreshes
    #[serde(default = "default_interval")]
    pub interval_secs: u64,

    /// Run the timer at all in `watch` mode
    #[serde(default = "default_auto_refresh")]
    pub auto_refresh: bool,
}

fn default_interval() -> u64 {
    300
}

fn default_auto_refresh() -> bool {
    true
}

impl RefreshConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs.max(1))
    }
}

impl Default for RefreshConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_interval(),
            auto_refresh: default_auto_refresh(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct StorageConfig {
    /// SQLite database file; defaults to the platform data dir
    pub path: Option<PathBuf>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.service.base_url, "http://localhost:8000/api");
        assert_eq!(config.refresh.interval_secs, 300);
        assert_eq!(config.refresh.interval(), crate::DEFAULT_REFRESH_INTERVAL);
        assert!(config.refresh.auto_refresh);
        assert_eq!(config.storage.path, None);
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[refresh]\ninterval_secs = 60\n").unwrap();

        let config = Config::load_from(&path).unwrap();
        assert_eq!(config.refresh.interval_secs, 60);
        assert!(config.refresh.auto_refresh);
        assert_eq!(config.service, ServiceConfig::default());
    }

    #[test]
    fn test_missing_file_is_default() {
        let dir = TempDir::new().unwrap();
        let config = Config::load_from(&dir.path().join("nope.toml")).unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_save_and_reload() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let mut config = Config::default();
        config.storage.path = Some(dir.path().join("db.sqlite"));
        config.service.base_url = "https://track.example.com/api".to_string();
        config.save_to(&path).unwrap();

        let reloaded = Config::load_from(&path).unwrap();
        assert_eq!(reloaded, config);
        assert_eq!(reloaded.database_path().unwrap(), dir.path().join("db.sqlite"));
    }

    #[test]
    fn test_bad_toml_is_config_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "refresh = [").unwrap();
        assert!(matches!(
            Config::load_from(&path),
            Err(crate::Error::ConfigError(_))
        ));
    }
}
