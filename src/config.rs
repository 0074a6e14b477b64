//! Runtime settings for the keyserver gateway, gpg, and the sync engine.
//!
//! Settings are read once from an optional TOML file, then overridden from the
//! environment, and handed to constructors explicitly.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use tracing::debug;

use crate::error::{Error, Result};

pub const DEFAULT_KEYSERVER_URL: &str = "https://keyserver.ubuntu.com";

/// Environment variable that overrides `keyserver_url`.
pub const KEYSERVER_URL_ENV_VAR: &str = "KEYWARDEN_KEYSERVER_URL";

/// Environment variable that overrides `store_path`.
pub const STORE_PATH_ENV_VAR: &str = "KEYWARDEN_STORE_PATH";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// HKP keyserver base URL, e.g. `https://keyserver.ubuntu.com`.
    pub keyserver_url: String,
    pub keyserver_timeout_secs: u64,
    pub gpg_binary: String,
    pub gpg_timeout_secs: u64,
    /// How long a key that gpg could not make sense of is left alone.
    pub broken_key_retry_days: i64,
    /// Keys synced longer ago than this are refreshed on access.
    pub max_staleness_hours: i64,
    /// Best-practice reports older than this are purged.
    pub test_report_max_age_hours: i64,
    pub store_path: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            keyserver_url: DEFAULT_KEYSERVER_URL.to_string(),
            keyserver_timeout_secs: 5,
            gpg_binary: "gpg".to_string(),
            gpg_timeout_secs: 5,
            broken_key_retry_days: 7,
            max_staleness_hours: 24,
            test_report_max_age_hours: 12,
            store_path: PathBuf::from("keywarden.db"),
        }
    }
}

impl Config {
    /// Loads settings from `path` (defaults if the file is absent), then
    /// applies environment overrides and validates the result.
    pub fn load(path: &Path) -> Result<Self> {
        let config = match std::fs::read_to_string(path) {
            Ok(contents) => Self::from_toml_str(&contents)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "no config file, using defaults");
                Self::default()
            }
            Err(e) => {
                return Err(Error::Config(format!(
                    "failed to read {}: {e}",
                    path.display()
                )));
            }
        };

        let config = config.with_env_overrides(|name| std::env::var(name).ok());
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml_str(contents: &str) -> Result<Self> {
        toml::from_str(contents).map_err(|e| Error::Config(e.to_string()))
    }

    /// Applies overrides from `lookup`, which maps variable names to values.
    #[must_use]
    pub fn with_env_overrides<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup(KEYSERVER_URL_ENV_VAR).filter(|v| !v.trim().is_empty()) {
            self.keyserver_url = url.trim().to_string();
        }
        if let Some(path) = lookup(STORE_PATH_ENV_VAR).filter(|v| !v.trim().is_empty()) {
            self.store_path = PathBuf::from(path.trim());
        }
        self
    }

    pub fn validate(&self) -> Result<()> {
        let url = self.keyserver_url.trim();
        if !(url.starts_with("https://") || url.starts_with("http://")) {
            return Err(Error::Config(format!(
                "keyserver_url must start with http:// or https:// (got `{url}`)"
            )));
        }
        if self.keyserver_timeout_secs == 0 || self.gpg_timeout_secs == 0 {
            return Err(Error::Config("timeouts must be at least one second".into()));
        }
        if self.broken_key_retry_days < 0
            || self.max_staleness_hours < 0
            || self.test_report_max_age_hours < 0
        {
            return Err(Error::Config("durations must not be negative".into()));
        }
        Ok(())
    }

    pub fn keyserver_timeout(&self) -> Duration {
        Duration::from_secs(self.keyserver_timeout_secs)
    }

    pub fn gpg_timeout(&self) -> Duration {
        Duration::from_secs(self.gpg_timeout_secs)
    }

    pub fn broken_key_retry(&self) -> chrono::TimeDelta {
        chrono::TimeDelta::days(self.broken_key_retry_days)
    }

    pub fn max_staleness(&self) -> chrono::TimeDelta {
        chrono::TimeDelta::hours(self.max_staleness_hours)
    }

    pub fn test_report_max_age(&self) -> chrono::TimeDelta {
        chrono::TimeDelta::hours(self.test_report_max_age_hours)
    }
}
