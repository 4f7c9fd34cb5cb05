//! Application configuration management.
//!
//! Configuration is stored at `~/.config/accountcache/config.json`. Missing
//! fields fall back to defaults, and a few settings can be overridden from
//! the environment (or a `.env` file loaded by the frontend).

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::cache::account_data::{DEFAULT_EXPIRED_REFRESH_INTERVAL, DEFAULT_REFRESH_HORIZON_HOURS};
use crate::cache::backoff::{DEFAULT_INITIAL_DELAY, DEFAULT_MAX_DELAY};
use crate::cache::{Backoff, CacheOptions};

/// Application name used for config directory paths
const APP_NAME: &str = "accountcache";

/// Config file name
const CONFIG_FILE: &str = "config.json";

/// Production accounts API
const DEFAULT_API_BASE_URL: &str = "https://api.mullvad.net";

/// Per-request timeout for API calls
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

/// Longest accepted refresh horizon (one year)
const MAX_REFRESH_HORIZON_HOURS: i64 = 24 * 366;

/// Environment variable overriding `api_base_url`
pub const ENV_API_URL: &str = "ACCOUNTCACHE_API_URL";

/// Environment variable overriding `log_dir`
pub const ENV_LOG_DIR: &str = "ACCOUNTCACHE_LOG_DIR";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub api_base_url: String,
    pub request_timeout_secs: u64,
    pub cache: CacheConfig,
    /// Directory for rolling log files; stderr only when unset
    pub log_dir: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            cache: CacheConfig::default(),
            log_dir: None,
        }
    }
}

/// Timing knobs of the account data cache.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub retry_initial_delay_secs: u64,
    pub retry_max_delay_secs: u64,
    pub expired_refresh_secs: u64,
    pub refresh_horizon_hours: i64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            retry_initial_delay_secs: DEFAULT_INITIAL_DELAY.as_secs(),
            retry_max_delay_secs: DEFAULT_MAX_DELAY.as_secs(),
            expired_refresh_secs: DEFAULT_EXPIRED_REFRESH_INTERVAL.as_secs(),
            refresh_horizon_hours: DEFAULT_REFRESH_HORIZON_HOURS,
        }
    }
}

impl CacheConfig {
    /// Reject settings that would make the cache poll without pause or overflow.
    pub fn validate(&self) -> Result<()> {
        let delays = [
            ("retry_initial_delay_secs", self.retry_initial_delay_secs),
            ("retry_max_delay_secs", self.retry_max_delay_secs),
            ("expired_refresh_secs", self.expired_refresh_secs),
        ];
        for (name, secs) in delays {
            if secs == 0 {
                bail!("{} must be at least 1 second", name);
            }
        }
        if !(0..=MAX_REFRESH_HORIZON_HOURS).contains(&self.refresh_horizon_hours) {
            bail!(
                "refresh_horizon_hours must be between 0 and {}, got {}",
                MAX_REFRESH_HORIZON_HOURS,
                self.refresh_horizon_hours
            );
        }
        Ok(())
    }
}

impl Config {
    /// Load the default config file (or defaults), then apply environment overrides.
    pub fn load() -> Result<Self> {
        Self::load_path(&Self::config_path()?)
    }

    /// Load `path` (or defaults), then apply environment overrides.
    pub fn load_path(path: &Path) -> Result<Self> {
        Self::load_with_env(path, |key| std::env::var(key).ok())
    }

    fn load_with_env(path: &Path, var: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::load_from(path)?;
        config.apply_overrides(var);
        Ok(config)
    }

    /// Load `path` as is, without environment overrides.
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            debug!(path = %path.display(), "No config file, using defaults");
            return Ok(Self::default());
        }

        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let config: Self = serde_json::from_str(&contents)
            .with_context(|| format!("Invalid config file {}", path.display()))?;
        config
            .cache
            .validate()
            .with_context(|| format!("Invalid cache settings in {}", path.display()))?;
        Ok(config)
    }

    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_path()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    pub fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find config directory"))?;
        Ok(config_dir.join(APP_NAME).join(CONFIG_FILE))
    }

    /// Apply overrides looked up by `var`. Empty values are ignored.
    fn apply_overrides(&mut self, var: impl Fn(&str) -> Option<String>) {
        let var = |key: &str| var(key).filter(|value| !value.trim().is_empty());

        if let Some(url) = var(ENV_API_URL) {
            debug!(url = %url, "API URL overridden from environment");
            self.api_base_url = url;
        }
        if let Some(dir) = var(ENV_LOG_DIR) {
            self.log_dir = Some(PathBuf::from(dir));
        }
    }

    pub fn cache_options(&self) -> Result<CacheOptions> {
        self.cache.validate()?;
        let refresh_horizon = chrono::Duration::try_hours(self.cache.refresh_horizon_hours)
            .context("Invalid refresh_horizon_hours")?;

        Ok(CacheOptions {
            backoff: Backoff::new(
                Duration::from_secs(self.cache.retry_initial_delay_secs),
                Duration::from_secs(self.cache.retry_max_delay_secs),
            ),
            expired_refresh_interval: Duration::from_secs(self.cache.expired_refresh_secs),
            refresh_horizon,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load_from(&dir.path().join("config.json")).unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.cache_options().unwrap().backoff.initial(), Duration::from_secs(8));
    }

    #[test]
    fn test_save_and_partial_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.json");

        let mut config = Config::default();
        config.api_base_url = "http://localhost:8080".to_string();
        config.cache.retry_max_delay_secs = 120;
        config.save_to(&path).unwrap();
        assert_eq!(Config::load_from(&path).unwrap(), config);

        std::fs::write(&path, r#"{"cache":{"expired_refresh_secs":5}}"#).unwrap();
        let partial = Config::load_from(&path).unwrap();
        assert_eq!(partial.api_base_url, DEFAULT_API_BASE_URL);
        assert_eq!(partial.cache.expired_refresh_secs, 5);
        assert_eq!(partial.cache.retry_initial_delay_secs, 8);
    }

    #[test]
    fn test_invalid_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, "not json").unwrap();
        assert!(Config::load_from(&path).is_err());
    }

    #[test]
    fn test_out_of_range_refresh_horizon_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");

        std::fs::write(&path, r#"{"cache":{"refresh_horizon_hours":9223372036854775807}}"#).unwrap();
        assert!(Config::load_from(&path).is_err());

        std::fs::write(&path, r#"{"cache":{"refresh_horizon_hours":-1}}"#).unwrap();
        assert!(Config::load_from(&path).is_err());

        let config = Config {
            cache: CacheConfig {
                refresh_horizon_hours: i64::MAX,
                ..CacheConfig::default()
            },
            ..Config::default()
        };
        assert!(config.cache_options().is_err());
    }

    #[test]
    fn test_zero_delays_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");

        for field in ["retry_initial_delay_secs", "retry_max_delay_secs", "expired_refresh_secs"] {
            std::fs::write(&path, format!(r#"{{"cache":{{"{field}":0}}}}"#)).unwrap();
            let error = Config::load_from(&path).unwrap_err();
            assert!(format!("{error:#}").contains(field));
        }
    }

    #[test]
    fn test_load_with_env_applies_overrides_to_explicit_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("custom.json");
        std::fs::write(&path, r#"{"api_base_url":"http://from-file"}"#).unwrap();

        let config = Config::load_with_env(&path, |key| match key {
            ENV_API_URL => Some("http://from-env".to_string()),
            ENV_LOG_DIR => Some("/var/log/accountcache".to_string()),
            _ => None,
        })
        .unwrap();
        assert_eq!(config.api_base_url, "http://from-env");
        assert_eq!(config.log_dir, Some(PathBuf::from("/var/log/accountcache")));
    }

    #[test]
    fn test_environment_overrides() {
        let mut config = Config::default();
        config.apply_overrides(|key| match key {
            ENV_API_URL => Some("http://127.0.0.1:9000".to_string()),
            ENV_LOG_DIR => Some("  ".to_string()),
            _ => None,
        });
        assert_eq!(config.api_base_url, "http://127.0.0.1:9000");
        assert_eq!(config.log_dir, None);
    }

    #[test]
    fn test_cache_options_from_config() {
        let config = Config {
            cache: CacheConfig {
                retry_initial_delay_secs: 2,
                retry_max_delay_secs: 1,
                expired_refresh_secs: 10,
                refresh_horizon_hours: 48,
            },
            ..Config::default()
        };
        let options = config.cache_options().unwrap();
        assert_eq!(options.backoff.initial(), Duration::from_secs(2));
        assert_eq!(options.backoff.max(), Duration::from_secs(2));
        assert_eq!(options.expired_refresh_interval, Duration::from_secs(10));
        assert_eq!(options.refresh_horizon, chrono::Duration::hours(48));
    }
}
