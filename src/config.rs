//! Configuration module for treewatch.
//!
//! This module provides a layered configuration system that supports:
//! - Default values
//! - TOML configuration file (`.treewatch/settings.toml`)
//! - Environment variable overrides
//! - CLI argument overrides (applied by the binary)
//!
//! # Environment Variables
//!
//! Environment variables must be prefixed with `TW_` and use double underscores
//! to separate nested levels:
//! - `TW_WATCH__RECURSIVE=false` sets `watch.recursive`
//! - `TW_WATCH__BACKEND=poll` sets `watch.backend`
//! - `TW_LOGGING__DEFAULT=debug` sets `logging.default`

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::watcher::Backend;

/// Directory holding the settings file.
pub const CONFIG_DIR: &str = ".treewatch";

/// Settings file name inside [`CONFIG_DIR`].
pub const CONFIG_FILE: &str = "settings.toml";

/// Environment variable prefix.
pub const ENV_PREFIX: &str = "TW_";

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct Settings {
    /// Version of the configuration schema
    #[serde(default = "default_version")]
    pub version: u32,

    /// Watch session settings
    #[serde(default)]
    pub watch: WatchConfig,

    /// Log levels
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct WatchConfig {
    /// Also watch every current and future subdirectory
    #[serde(default = "default_true")]
    pub recursive: bool,

    /// Notification mechanism
    #[serde(default)]
    pub backend: BackendKind,

    /// Scan interval for the polling backend
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// inotify / FSEvents / kqueue / ReadDirectoryChangesW
    #[default]
    Native,
    /// Periodic directory scans; works on network and virtual filesystems
    Poll,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct LoggingConfig {
    /// Default level for all modules
    #[serde(default = "default_log_level")]
    pub default: String,

    /// Per-module overrides, e.g. `treewatch::watcher = "debug"`
    #[serde(default)]
    pub modules: HashMap<String, String>,
}

// Default value functions
fn default_version() -> u32 {
    1
}
fn default_true() -> bool {
    true
}
fn default_poll_interval_ms() -> u64 {
    500
}
fn default_log_level() -> String {
    "warn".to_string()
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            version: default_version(),
            watch: WatchConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            recursive: true,
            backend: BackendKind::default(),
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            default: default_log_level(),
            modules: HashMap::new(),
        }
    }
}

impl WatchConfig {
    /// Backend selection for the session builder.
    pub fn backend(&self) -> Backend {
        match self.backend {
            BackendKind::Native => Backend::Native,
            BackendKind::Poll => Backend::Poll {
                interval: Duration::from_millis(self.poll_interval_ms),
            },
        }
    }
}

impl Settings {
    /// Load configuration from all sources
    pub fn load() -> Result<Self, Box<figment::Error>> {
        let config_path = Self::find_workspace_config()
            .unwrap_or_else(|| PathBuf::from(CONFIG_DIR).join(CONFIG_FILE));
        Self::load_from(config_path)
    }

    /// Load configuration from a specific file, still honoring env overrides
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self, Box<figment::Error>> {
        Figment::new()
            // Start with defaults
            .merge(Serialized::defaults(Settings::default()))
            // Layer in config file if it exists
            .merge(Toml::file(path.as_ref()))
            // Double underscore (__) separates nested levels
            .merge(Env::prefixed(ENV_PREFIX).map(|key| {
                key.as_str()
                    .to_lowercase()
                    .replace("__", ".")
                    .into()
            }))
            .extract()
            .map_err(Box::new)
    }

    /// Find the settings file by looking for a `.treewatch` directory from
    /// the current directory up to the filesystem root
    fn find_workspace_config() -> Option<PathBuf> {
        let current = std::env::current_dir().ok()?;

        for ancestor in current.ancestors() {
            let config_dir = ancestor.join(CONFIG_DIR);
            if config_dir.is_dir() {
                return Some(config_dir.join(CONFIG_FILE));
            }
        }

        None
    }

    /// Save current configuration to file
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), Box<dyn std::error::Error>> {
        let parent = path.as_ref().parent().ok_or("Invalid path")?;
        std::fs::create_dir_all(parent)?;

        let toml_string = toml::to_string_pretty(self)?;
        std::fs::write(path, toml_string)?;

        Ok(())
    }

    /// Create a default settings file in the current directory
    pub fn init_config_file(force: bool) -> Result<PathBuf, Box<dyn std::error::Error>> {
        let config_path = PathBuf::from(CONFIG_DIR).join(CONFIG_FILE);
        Self::init_config_at(&config_path, force)?;
        Ok(config_path)
    }

    fn init_config_at(config_path: &Path, force: bool) -> Result<(), Box<dyn std::error::Error>> {
        if !force && config_path.exists() {
            return Err("Configuration file already exists. Use --force to overwrite".into());
        }

        Settings::default().save(config_path)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_default_settings() {
        let settings = Settings::default();
        assert_eq!(settings.version, 1);
        assert!(settings.watch.recursive);
        assert_eq!(settings.watch.backend, BackendKind::Native);
        assert_eq!(settings.watch.backend(), Backend::Native);
        assert_eq!(settings.logging.default, "warn");
    }

    #[test]
    fn test_load_from_toml() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("settings.toml");

        let toml_content = r#"
version = 2

[watch]
recursive = false
backend = "poll"
poll_interval_ms = 250

[logging]
default = "info"

[logging.modules]
"treewatch::watcher" = "trace"
"#;

        fs::write(&config_path, toml_content).unwrap();

        let settings = Settings::load_from(&config_path).unwrap();
        assert_eq!(settings.version, 2);
        assert!(!settings.watch.recursive);
        assert_eq!(
            settings.watch.backend(),
            Backend::Poll {
                interval: Duration::from_millis(250)
            }
        );
        assert_eq!(settings.logging.default, "info");
        assert_eq!(settings.logging.modules["treewatch::watcher"], "trace");
    }

    #[test]
    fn test_partial_config() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("settings.toml");

        // Only specify a single setting
        fs::write(&config_path, "[watch]\nbackend = \"poll\"\n").unwrap();

        let settings = Settings::load_from(&config_path).unwrap();

        assert_eq!(settings.watch.backend, BackendKind::Poll);
        // Default values should still be present
        assert!(settings.watch.recursive);
        assert_eq!(settings.watch.poll_interval_ms, 500);
        assert_eq!(settings.version, 1);
    }

    #[test]
    fn test_missing_file_yields_defaults() {
        let temp_dir = TempDir::new().unwrap();

        let settings = Settings::load_from(temp_dir.path().join("absent.toml")).unwrap();

        assert_eq!(settings.watch, WatchConfig::default());
    }

    #[test]
    fn test_invalid_backend_is_rejected() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("settings.toml");
        fs::write(&config_path, "[watch]\nbackend = \"carrier-pigeon\"\n").unwrap();

        assert!(Settings::load_from(&config_path).is_err());
    }

    #[test]
    fn test_save_settings() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("nested/settings.toml");

        let mut settings = Settings::default();
        settings.watch.recursive = false;
        settings.watch.poll_interval_ms = 1000;

        settings.save(&config_path).unwrap();

        let loaded = Settings::load_from(&config_path).unwrap();
        assert!(!loaded.watch.recursive);
        assert_eq!(loaded.watch.poll_interval_ms, 1000);
    }

    #[test]
    fn test_init_refuses_to_overwrite_without_force() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join(CONFIG_DIR).join(CONFIG_FILE);

        Settings::init_config_at(&config_path, false).unwrap();
        assert!(Settings::init_config_at(&config_path, false).is_err());
        Settings::init_config_at(&config_path, true).unwrap();
    }
}
