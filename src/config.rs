//! Configuration for callbackpool.
//!
//! Pool sizing, regions, paths, and the capture command live here. The
//! health thresholds in the session model are deliberately not
//! configurable; they are fixed policy.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::capture::{DEFAULT_REFRESH_INTERVAL_MINS, DEFAULT_TARGET_PER_REGION};
use crate::pool::DEFAULT_MIN_PER_REGION;
use crate::repository::DEFAULT_RETENTION_DAYS;

/// Default database filename.
pub const DEFAULT_DATABASE_FILENAME: &str = "callbackpool.db";

/// Config filename looked up in the working directory and the user config dir.
pub const CONFIG_FILENAME: &str = "callbackpool.toml";

/// Errors loading or writing configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("invalid config {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("failed to write config {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to render config: {0}")]
    Render(#[from] toml::ser::Error),
}

/// Application settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Base data directory.
    pub data_dir: PathBuf,
    /// Database filename inside the data directory.
    pub database_filename: String,
    /// Regions the pool maintains sessions for.
    pub regions: Vec<String>,
    /// Healthy sessions a region must hold before checkout stops asking
    /// for reinforcements.
    pub min_sessions_per_region: usize,
    /// Healthy sessions a refresh aims for per region.
    pub target_sessions_per_region: usize,
    /// Minutes between maintenance passes in `cbpool maintain`.
    pub refresh_interval_mins: u64,
    /// Days to keep rows before `sessions prune` deletes them.
    pub retention_days: i64,
    /// User agent for replay requests.
    pub user_agent: String,
    /// Replay request timeout in seconds.
    pub request_timeout: u64,
    /// Optional egress proxy for replays (http, https or socks5 URL).
    pub proxy: Option<String>,
    /// External command that captures a fresh callback URL. `{region}` in
    /// any argument is replaced with the region being captured.
    pub capture_command: Option<String>,
    /// Arguments for the capture command.
    pub capture_args: Vec<String>,
    /// Egress bucket label recorded on captured sessions.
    pub source_pool_label: String,
}

impl Default for Settings {
    fn default() -> Self {
        // Keep user data under the platform data dir.
        // Falls back gracefully: data dir -> home dir -> current dir.
        let data_dir = dirs::data_local_dir()
            .or_else(dirs::home_dir)
            .unwrap_or_else(|| PathBuf::from("."))
            .join("callbackpool");

        Self {
            data_dir,
            database_filename: DEFAULT_DATABASE_FILENAME.to_string(),
            regions: vec!["US-West".to_string(), "US-East".to_string()],
            min_sessions_per_region: DEFAULT_MIN_PER_REGION,
            target_sessions_per_region: DEFAULT_TARGET_PER_REGION,
            refresh_interval_mins: DEFAULT_REFRESH_INTERVAL_MINS,
            retention_days: DEFAULT_RETENTION_DAYS,
            user_agent: "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
                         (KHTML, like Gecko) Chrome/126.0.0.0 Safari/537.36"
                .to_string(),
            request_timeout: 30,
            proxy: None,
            capture_command: None,
            capture_args: Vec::new(),
            source_pool_label: "no_proxy".to_string(),
        }
    }
}

impl Settings {
    /// Load settings, trying an explicit path first, then the working
    /// directory, then the user config dir. Missing files fall through to
    /// defaults; a present-but-broken file is an error.
    pub fn load(config_path: Option<&Path>) -> Result<Self, ConfigError> {
        if let Some(path) = config_path {
            return Self::load_from_path(path);
        }

        let cwd_config = PathBuf::from(CONFIG_FILENAME);
        if cwd_config.exists() {
            return Self::load_from_path(&cwd_config);
        }

        if let Some(path) = Self::user_config_path() {
            if path.exists() {
                return Self::load_from_path(&path);
            }
        }

        Ok(Self::default())
    }

    /// Load settings from one specific file.
    pub fn load_from_path(path: &Path) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// The per-user config file location, if a config dir exists.
    pub fn user_config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("callbackpool").join("config.toml"))
    }

    /// Write this settings struct as a starter config file.
    pub fn write_starter(&self, path: &Path) -> Result<(), ConfigError> {
        let write_err = |source| ConfigError::Write {
            path: path.to_path_buf(),
            source,
        };
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(write_err)?;
        }
        let rendered = toml::to_string_pretty(self)?;
        fs::write(path, rendered).map_err(write_err)?;
        Ok(())
    }

    /// Full path to the sessions database.
    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join(&self.database_filename)
    }

    /// Whether the database file exists yet.
    pub fn database_exists(&self) -> bool {
        self.database_path().exists()
    }

    /// Ensure the data directory exists.
    pub fn ensure_directories(&self) -> std::io::Result<()> {
        fs::create_dir_all(&self.data_dir).map_err(|e| {
            std::io::Error::new(
                e.kind(),
                format!(
                    "Failed to create data directory '{}': {}",
                    self.data_dir.display(),
                    e
                ),
            )
        })
    }

    /// Replay timeout as a duration.
    pub fn request_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.request_timeout)
    }

    /// Maintenance interval as a duration.
    pub fn refresh_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.refresh_interval_mins * 60)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_sane() {
        let settings = Settings::default();
        assert_eq!(settings.regions, vec!["US-West", "US-East"]);
        assert_eq!(settings.min_sessions_per_region, 2);
        assert_eq!(settings.target_sessions_per_region, 3);
        assert_eq!(settings.refresh_interval_mins, 30);
        assert_eq!(settings.source_pool_label, "no_proxy");
        assert!(settings
            .database_path()
            .ends_with("callbackpool/callbackpool.db"));
    }

    #[test]
    fn test_partial_config_fills_defaults() {
        let parsed: Settings = toml::from_str(
            r#"
            regions = ["EU-Central"]
            capture_command = "capture-callback"
            capture_args = ["--region", "{region}"]
            "#,
        )
        .unwrap();
        assert_eq!(parsed.regions, vec!["EU-Central"]);
        assert_eq!(parsed.capture_command.as_deref(), Some("capture-callback"));
        assert_eq!(parsed.min_sessions_per_region, 2);
        assert_eq!(parsed.database_filename, DEFAULT_DATABASE_FILENAME);
    }

    #[test]
    fn test_load_missing_explicit_path_errors() {
        let err = Settings::load_from_path(Path::new("/nonexistent/callbackpool.toml"));
        assert!(matches!(err, Err(ConfigError::Read { .. })));
    }

    #[test]
    fn test_starter_config_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");

        let mut settings = Settings::default();
        settings.regions = vec!["US-West".to_string()];
        settings.proxy = Some("socks5://127.0.0.1:9050".to_string());
        settings.write_starter(&path).unwrap();

        let loaded = Settings::load_from_path(&path).unwrap();
        assert_eq!(loaded.regions, vec!["US-West"]);
        assert_eq!(loaded.proxy.as_deref(), Some("socks5://127.0.0.1:9050"));
    }

    #[test]
    fn test_invalid_config_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "regions = 5").unwrap();
        assert!(matches!(
            Settings::load_from_path(&path),
            Err(ConfigError::Parse { .. })
        ));
    }
}
