//! Configuration management for the freezer.
//!
//! Loads configuration from a TOML file with environment variable overrides.

use crate::db::revisions::{table_name, DEFAULT_TABLE_NAME};
use crate::utils::errors::{FreezerError, Result};
use crate::watch::WatchMode;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Overrides the database file
pub const ENV_DB_PATH: &str = "FREEZER_DB_PATH";
/// Overrides the default storage id
pub const ENV_STORAGE_ID: &str = "FREEZER_STORAGE_ID";
/// Overrides the log level
pub const ENV_LOG_LEVEL: &str = "FREEZER_LOG_LEVEL";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub database: DatabaseConfig,

    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub watch: WatchConfig,

    #[serde(default)]
    pub log: LogConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// SQLite database file. Relative paths resolve against the config file.
    #[serde(default = "default_db_path")]
    pub path: PathBuf,

    /// Base name of the revision table
    #[serde(default = "default_table_name")]
    pub table_name: String,

    /// Prepended to `table_name`
    #[serde(default)]
    pub table_prefix: String,

    /// Maximum pooled connections
    #[serde(default = "default_pool_size")]
    pub pool_size: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Storage id used when the command line gives none
    #[serde(default = "default_storage_id")]
    pub storage_id: String,

    /// Directory name placed in front of every archive entry
    #[serde(default)]
    pub local_name: Option<String>,

    /// Append a revision on every backup instead of overwriting
    #[serde(default)]
    pub new_revision: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WatchConfig {
    /// none, native or poll
    #[serde(default)]
    pub mode: WatchMode,

    /// Scan interval for the poll backend
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// How long one monitor pass waits for events
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

// Default values
fn default_db_path() -> PathBuf {
    PathBuf::from("freezer.db")
}

fn default_table_name() -> String {
    DEFAULT_TABLE_NAME.to_string()
}

fn default_pool_size() -> u32 {
    4
}

fn default_storage_id() -> String {
    "default".to_string()
}

fn default_poll_interval_ms() -> u64 {
    2000
}

fn default_timeout_ms() -> u64 {
    1000
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
            table_name: default_table_name(),
            table_prefix: String::new(),
            pool_size: default_pool_size(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            storage_id: default_storage_id(),
            local_name: None,
            new_revision: false,
        }
    }
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            mode: WatchMode::default(),
            poll_interval_ms: default_poll_interval_ms(),
            timeout_ms: default_timeout_ms(),
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl WatchConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content)
            .map_err(|e| FreezerError::Config(format!("{}: {}", path.display(), e)))
    }

    /// Load `path`, writing the defaults there first if it does not exist
    pub fn load_or_create(path: &Path) -> Result<Self> {
        if path.exists() {
            return Self::from_file(path);
        }

        let config = Self::default();
        config.save(path)?;
        tracing::info!(config = %path.display(), "Wrote default configuration");
        Ok(config)
    }

    /// Write the configuration as TOML, creating parent directories
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)
            .map_err(|e| FreezerError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let lookup = |key: &str| lookup(key).filter(|value| !value.is_empty());

        if let Some(path) = lookup(ENV_DB_PATH) {
            self.database.path = PathBuf::from(path);
        }
        if let Some(storage_id) = lookup(ENV_STORAGE_ID) {
            self.storage.storage_id = storage_id;
        }
        if let Some(level) = lookup(ENV_LOG_LEVEL) {
            self.log.level = level;
        }
    }

    /// Settings as the commands see them: `FREEZER_*` environment overrides
    /// applied and the database path resolved against the directory of
    /// `config_path`
    pub fn effective(self, config_path: &Path) -> Self {
        self.effective_with(config_path, |key| std::env::var(key).ok())
    }

    fn effective_with(
        mut self,
        config_path: &Path,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Self {
        self.apply_overrides(lookup);
        if let Some(base) = config_path.parent() {
            self.resolve_paths(base);
        }
        self
    }

    /// Make a relative database path relative to `base` (the config file's directory)
    pub fn resolve_paths(&mut self, base: &Path) {
        if self.database.path.is_relative() {
            self.database.path = base.join(&self.database.path);
        }
    }

    /// Physical revision table name
    pub fn table_name(&self) -> Result<String> {
        table_name(&self.database.table_prefix, &self.database.table_name)
    }

    /// Every setting as `key = value` pairs, in file order
    pub fn entries(&self) -> Vec<(String, String)> {
        vec![
            ("database.path".into(), self.database.path.display().to_string()),
            ("database.table_name".into(), self.database.table_name.clone()),
            ("database.table_prefix".into(), self.database.table_prefix.clone()),
            ("database.pool_size".into(), self.database.pool_size.to_string()),
            ("storage.storage_id".into(), self.storage.storage_id.clone()),
            (
                "storage.local_name".into(),
                self.storage.local_name.clone().unwrap_or_default(),
            ),
            ("storage.new_revision".into(), self.storage.new_revision.to_string()),
            ("watch.mode".into(), watch_mode_name(self.watch.mode).to_string()),
            ("watch.poll_interval_ms".into(), self.watch.poll_interval_ms.to_string()),
            ("watch.timeout_ms".into(), self.watch.timeout_ms.to_string()),
            ("log.level".into(), self.log.level.clone()),
        ]
    }
}

fn watch_mode_name(mode: WatchMode) -> &'static str {
    match mode {
        WatchMode::None => "none",
        WatchMode::Native => "native",
        WatchMode::Poll => "poll",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::TempDir;

    #[test]
    fn test_partial_file_takes_defaults() -> std::io::Result<()> {
        let temp_dir = TempDir::new()?;
        let path = temp_dir.path().join("config.toml");
        std::fs::write(
            &path,
            "[database]\ntable_prefix = \"df_sys_\"\n\n[watch]\nmode = \"poll\"\n",
        )?;

        let config = Config::from_file(&path).unwrap();

        assert_eq!(config.database.table_prefix, "df_sys_");
        assert_eq!(config.database.table_name, "persist");
        assert_eq!(config.table_name().unwrap(), "df_sys_persist");
        assert_eq!(config.watch.mode, WatchMode::Poll);
        assert_eq!(config.watch.timeout(), Duration::from_millis(1000));
        assert_eq!(config.log.level, "info");

        Ok(())
    }

    #[test]
    fn test_save_then_load() -> std::io::Result<()> {
        let temp_dir = TempDir::new()?;
        let path = temp_dir.path().join("nested/config.toml");

        let mut config = Config::default();
        config.database.pool_size = 8;
        config.storage.local_name = Some("storage".into());
        config.save(&path).unwrap();

        assert_eq!(Config::from_file(&path).unwrap(), config);

        Ok(())
    }

    #[test]
    fn test_load_or_create_writes_defaults() -> std::io::Result<()> {
        let temp_dir = TempDir::new()?;
        let path = temp_dir.path().join("config.toml");

        let config = Config::load_or_create(&path).unwrap();

        assert!(path.exists());
        assert_eq!(config, Config::default());

        Ok(())
    }

    #[test]
    fn test_invalid_toml_is_config_error() -> std::io::Result<()> {
        let temp_dir = TempDir::new()?;
        let path = temp_dir.path().join("config.toml");
        std::fs::write(&path, "[database\npath = ")?;

        assert!(matches!(Config::from_file(&path), Err(FreezerError::Config(_))));

        Ok(())
    }

    #[test]
    fn test_overrides() {
        let env: HashMap<&str, &str> = [
            (ENV_DB_PATH, "/srv/freezer.db"),
            (ENV_STORAGE_ID, "node-a"),
            (ENV_LOG_LEVEL, ""),
        ]
        .into_iter()
        .collect();

        let mut config = Config::default();
        config.apply_overrides(|key| env.get(key).map(|v| v.to_string()));

        assert_eq!(config.database.path, PathBuf::from("/srv/freezer.db"));
        assert_eq!(config.storage.storage_id, "node-a");
        assert_eq!(config.log.level, "info");
    }

    #[test]
    fn test_resolve_paths() {
        let mut config = Config::default();
        config.resolve_paths(Path::new("/home/me/.freezer"));
        assert_eq!(config.database.path, PathBuf::from("/home/me/.freezer/freezer.db"));

        config.database.path = PathBuf::from("/abs.db");
        config.resolve_paths(Path::new("/elsewhere"));
        assert_eq!(config.database.path, PathBuf::from("/abs.db"));
    }

    #[test]
    fn test_effective_resolves_database_path() -> std::io::Result<()> {
        let temp_dir = TempDir::new()?;
        let path = temp_dir.path().join("config.toml");

        let config = Config::load_or_create(&path)
            .unwrap()
            .effective_with(&path, |_| None);
        let shown: HashMap<String, String> = config.entries().into_iter().collect();

        assert_eq!(config.database.path, temp_dir.path().join("freezer.db"));
        assert_eq!(
            shown["database.path"],
            temp_dir.path().join("freezer.db").display().to_string()
        );

        Ok(())
    }

    #[test]
    fn test_entries_cover_every_section() {
        let entries = Config::default().entries();
        let keys: Vec<&str> = entries.iter().map(|(k, _)| k.as_str()).collect();

        assert!(keys.contains(&"database.table_name"));
        assert!(keys.contains(&"storage.storage_id"));
        assert!(keys.contains(&"watch.mode"));
        assert!(keys.contains(&"log.level"));
        assert!(entries.contains(&("watch.mode".to_string(), "native".to_string())));
    }
}
