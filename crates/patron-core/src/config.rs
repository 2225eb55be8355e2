//! Application configuration
//!
//! Configuration is loaded from:
//! 1. Default values
//! 2. Config file (~/.config/patron/config.toml)
//! 3. Environment variables (PATRON_* prefix)
//!
//! Environment variables take precedence over config file values.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::warn;
use url::Url;

use crate::profiles::ProfilesMode;
use crate::storage;

/// Environment variable prefix
const ENV_PREFIX: &str = "PATRON";

const DEFAULT_MAX_CONCURRENT_DOWNLOADS: usize = 4;
const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 30;

/// Application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Directory holding profiles and temporary downloads
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Single anonymous profile, or named profiles
    #[serde(default)]
    pub profiles_mode: ProfilesMode,

    /// JSON file listing the available libraries
    #[serde(default)]
    pub providers_file: Option<PathBuf>,

    /// Library used for default accounts
    #[serde(default)]
    pub default_provider: Option<Url>,

    /// Upper bound on simultaneous book downloads
    #[serde(default = "default_max_concurrent_downloads")]
    pub max_concurrent_downloads: usize,

    /// Timeout applied to every HTTP request
    #[serde(default = "default_http_timeout_secs")]
    pub http_timeout_secs: u64,

    /// Write logs here instead of stderr
    #[serde(default)]
    pub log_file: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            profiles_mode: ProfilesMode::default(),
            providers_file: None,
            default_provider: None,
            max_concurrent_downloads: DEFAULT_MAX_CONCURRENT_DOWNLOADS,
            http_timeout_secs: DEFAULT_HTTP_TIMEOUT_SECS,
            log_file: None,
        }
    }
}

impl Config {
    /// Load configuration from default location and environment
    ///
    /// Order of precedence (highest to lowest):
    /// 1. Environment variables (PATRON_DATA_DIR, PATRON_PROFILES_MODE, ...)
    /// 2. Config file (~/.config/patron/config.toml or PATRON_CONFIG)
    /// 3. Default values
    pub fn load() -> Result<Self> {
        Self::load_from_path(&Self::config_file_path())
    }

    /// Load configuration from the path given on the command line, if any
    pub fn load_with_cli_override(path: Option<&PathBuf>) -> Result<Self> {
        match path {
            Some(path) => Self::load_from_path(path),
            None => Self::load(),
        }
    }

    /// Load configuration from a specific path
    ///
    /// Environment variables are still applied as overrides.
    /// If the file doesn't exist, defaults are used.
    pub fn load_from_path(path: &Path) -> Result<Self> {
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {:?}", path))?;
            toml::from_str(&content)
                .with_context(|| format!("Failed to parse config file: {:?}", path))?
        } else {
            Self::default()
        };

        config.apply_env_overrides();
        config.ensure_data_dir()?;
        Ok(config)
    }

    /// Load configuration from a TOML string (useful for testing)
    pub fn load_from_str(toml_content: &str) -> Result<Self> {
        let mut config: Config =
            toml::from_str(toml_content).context("Failed to parse config TOML")?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Apply environment variable overrides
    fn apply_env_overrides(&mut self) {
        if let Some(val) = env_var("DATA_DIR") {
            self.data_dir = PathBuf::from(val);
        }

        if let Some(val) = env_var("PROFILES_MODE") {
            match val.parse() {
                Ok(mode) => self.profiles_mode = mode,
                Err(e) => warn!("Ignoring {}_PROFILES_MODE: {}", ENV_PREFIX, e),
            }
        }

        if let Some(val) = env_var("PROVIDERS_FILE") {
            self.providers_file = if val.is_empty() {
                None
            } else {
                Some(PathBuf::from(val))
            };
        }

        if let Some(val) = env_var("DEFAULT_PROVIDER") {
            if val.is_empty() {
                self.default_provider = None;
            } else {
                match Url::parse(&val) {
                    Ok(url) => self.default_provider = Some(url),
                    Err(e) => warn!("Ignoring {}_DEFAULT_PROVIDER: {}", ENV_PREFIX, e),
                }
            }
        }

        if let Some(val) = env_var("MAX_CONCURRENT_DOWNLOADS") {
            match val.parse::<usize>() {
                Ok(n) if n > 0 => self.max_concurrent_downloads = n,
                _ => warn!(
                    "Ignoring {}_MAX_CONCURRENT_DOWNLOADS: expected a positive number",
                    ENV_PREFIX
                ),
            }
        }

        if let Some(val) = env_var("HTTP_TIMEOUT_SECS") {
            match val.parse::<u64>() {
                Ok(secs) => self.http_timeout_secs = secs,
                Err(e) => warn!("Ignoring {}_HTTP_TIMEOUT_SECS: {}", ENV_PREFIX, e),
            }
        }

        if let Some(val) = env_var("LOG_FILE") {
            self.log_file = if val.is_empty() {
                None
            } else {
                Some(PathBuf::from(val))
            };
        }
    }

    /// Ensure data directory exists
    fn ensure_data_dir(&self) -> Result<()> {
        if !self.data_dir.exists() {
            std::fs::create_dir_all(&self.data_dir)
                .with_context(|| format!("Failed to create data directory: {:?}", self.data_dir))?;
        }
        Ok(())
    }

    /// Save configuration to the default file
    pub fn save(&self) -> Result<()> {
        self.save_to_path(&Self::config_file_path())
    }

    /// Save configuration to a specific file
    pub fn save_to_path(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;
        storage::atomic_write(path, content.as_bytes())
            .with_context(|| format!("Failed to write config file: {:?}", path))?;
        Ok(())
    }

    /// Get the config file path
    ///
    /// Can be overridden with PATRON_CONFIG environment variable
    pub fn config_file_path() -> PathBuf {
        if let Some(path) = env_var("CONFIG") {
            return PathBuf::from(path);
        }

        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("patron")
            .join("config.toml")
    }

    /// Root of the profile store
    pub fn profiles_dir(&self) -> PathBuf {
        self.data_dir.join("profiles")
    }

    /// Where downloads are staged until they are stored
    pub fn temp_dir(&self) -> PathBuf {
        self.data_dir.join("tmp")
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }
}

fn env_var(name: &str) -> Option<String> {
    std::env::var(format!("{}_{}", ENV_PREFIX, name)).ok()
}

/// Get the default data directory
fn default_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("patron")
}

fn default_max_concurrent_downloads() -> usize {
    DEFAULT_MAX_CONCURRENT_DOWNLOADS
}

fn default_http_timeout_secs() -> u64 {
    DEFAULT_HTTP_TIMEOUT_SECS
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;
    use std::sync::Mutex;
    use tempfile::TempDir;

    // Serializes tests that touch environment variables
    static ENV_MUTEX: Mutex<()> = Mutex::new(());

    /// Locks env access and restores the saved variables on drop
    struct EnvGuard<'a> {
        _lock: std::sync::MutexGuard<'a, ()>,
        saved: Vec<(String, Option<String>)>,
    }

    impl<'a> EnvGuard<'a> {
        fn new(vars: &[&str]) -> Self {
            let lock = ENV_MUTEX.lock().unwrap_or_else(|e| e.into_inner());
            let saved = vars
                .iter()
                .map(|&name| (name.to_string(), env::var(name).ok()))
                .collect();
            for name in vars {
                env::remove_var(name);
            }
            Self { _lock: lock, saved }
        }
    }

    impl Drop for EnvGuard<'_> {
        fn drop(&mut self) {
            for (name, value) in &self.saved {
                match value {
                    Some(v) => env::set_var(name, v),
                    None => env::remove_var(name),
                }
            }
        }
    }

    const ENV_VARS: &[&str] = &[
        "PATRON_CONFIG",
        "PATRON_DATA_DIR",
        "PATRON_PROFILES_MODE",
        "PATRON_PROVIDERS_FILE",
        "PATRON_DEFAULT_PROVIDER",
        "PATRON_MAX_CONCURRENT_DOWNLOADS",
        "PATRON_HTTP_TIMEOUT_SECS",
        "PATRON_LOG_FILE",
    ];

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.profiles_mode, ProfilesMode::Anonymous);
        assert_eq!(config.max_concurrent_downloads, 4);
        assert_eq!(config.http_timeout(), Duration::from_secs(30));
        assert!(config.default_provider.is_none());
        assert!(config.data_dir.ends_with("patron"));
    }

    #[test]
    fn test_derived_paths() {
        let config = Config {
            data_dir: PathBuf::from("/data/patron"),
            ..Config::default()
        };
        assert_eq!(config.profiles_dir(), PathBuf::from("/data/patron/profiles"));
        assert_eq!(config.temp_dir(), PathBuf::from("/data/patron/tmp"));
    }

    #[test]
    fn test_env_override_data_dir() {
        let _guard = EnvGuard::new(ENV_VARS);

        let mut config = Config::default();
        env::set_var("PATRON_DATA_DIR", "/tmp/patron-test");
        config.apply_env_overrides();

        assert_eq!(config.data_dir, PathBuf::from("/tmp/patron-test"));
    }

    #[test]
    fn test_env_override_profiles_mode() {
        let _guard = EnvGuard::new(ENV_VARS);

        let mut config = Config::default();
        env::set_var("PATRON_PROFILES_MODE", "multi");
        config.apply_env_overrides();
        assert_eq!(config.profiles_mode, ProfilesMode::Multi);

        // Invalid values are ignored
        env::set_var("PATRON_PROFILES_MODE", "several");
        config.apply_env_overrides();
        assert_eq!(config.profiles_mode, ProfilesMode::Multi);
    }

    #[test]
    fn test_env_override_numbers() {
        let _guard = EnvGuard::new(ENV_VARS);

        let mut config = Config::default();
        env::set_var("PATRON_MAX_CONCURRENT_DOWNLOADS", "2");
        env::set_var("PATRON_HTTP_TIMEOUT_SECS", "5");
        config.apply_env_overrides();
        assert_eq!(config.max_concurrent_downloads, 2);
        assert_eq!(config.http_timeout_secs, 5);

        env::set_var("PATRON_MAX_CONCURRENT_DOWNLOADS", "0");
        config.apply_env_overrides();
        assert_eq!(config.max_concurrent_downloads, 2);
    }

    #[test]
    fn test_env_override_default_provider() {
        let _guard = EnvGuard::new(ENV_VARS);

        let mut config = Config::default();
        env::set_var("PATRON_DEFAULT_PROVIDER", "https://library.example/");
        config.apply_env_overrides();
        assert_eq!(
            config.default_provider,
            Some(Url::parse("https://library.example/").unwrap())
        );

        // Empty string clears it
        env::set_var("PATRON_DEFAULT_PROVIDER", "");
        config.apply_env_overrides();
        assert!(config.default_provider.is_none());
    }

    #[test]
    fn test_load_from_str() {
        let _guard = EnvGuard::new(ENV_VARS);

        let toml = r#"
            data_dir = "/custom/data"
            profiles_mode = "multi"
            default_provider = "https://library.example/"
            max_concurrent_downloads = 8
        "#;

        let config = Config::load_from_str(toml).unwrap();
        assert_eq!(config.data_dir, PathBuf::from("/custom/data"));
        assert_eq!(config.profiles_mode, ProfilesMode::Multi);
        assert_eq!(config.max_concurrent_downloads, 8);
        assert_eq!(config.http_timeout_secs, 30);
    }

    #[test]
    fn test_save_and_load_path() {
        let _guard = EnvGuard::new(ENV_VARS);
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("patron").join("config.toml");

        let config = Config {
            data_dir: temp_dir.path().join("data"),
            profiles_mode: ProfilesMode::Multi,
            log_file: Some(temp_dir.path().join("patron.log")),
            ..Config::default()
        };
        config.save_to_path(&path).unwrap();

        let loaded = Config::load_with_cli_override(Some(&path)).unwrap();
        assert_eq!(loaded.data_dir, config.data_dir);
        assert_eq!(loaded.profiles_mode, ProfilesMode::Multi);
        assert_eq!(loaded.log_file, config.log_file);
        assert!(loaded.data_dir.is_dir());
    }

    #[test]
    fn test_load_from_path_missing_file() {
        let _guard = EnvGuard::new(ENV_VARS);
        let temp_dir = TempDir::new().unwrap();
        env::set_var("PATRON_DATA_DIR", temp_dir.path().join("data"));

        let config = Config::load_from_path(&temp_dir.path().join("missing.toml")).unwrap();
        assert_eq!(config.profiles_mode, ProfilesMode::Anonymous);
        assert!(config.providers_file.is_none());
    }
}
