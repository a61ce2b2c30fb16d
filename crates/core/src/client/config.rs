use std::time::Duration;

use crate::errors::{Error, Result};
use crate::sync::DEFAULT_SYNC_INTERVAL_SECS;

pub const HOST_ENV: &str = "PROFILE_MIRROR_HOST";
pub const SYNC_INTERVAL_ENV: &str = "PROFILE_MIRROR_SYNC_INTERVAL_SECS";
pub const LOCALE_ENV: &str = "PROFILE_MIRROR_LOCALE";

/// Client settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    /// Base URL of the profile server, without trailing slash.
    pub host_name: String,
    pub sync_interval: Duration,
    /// Preferred locale for interaction parameters.
    pub locale: Option<String>,
}

impl ClientConfig {
    pub fn new(host_name: impl AsRef<str>) -> Self {
        let host_name = host_name.as_ref().trim();
        Self {
            host_name: host_name
                .strip_suffix('/')
                .unwrap_or(host_name)
                .to_string(),
            sync_interval: Duration::from_secs(DEFAULT_SYNC_INTERVAL_SECS),
            locale: None,
        }
    }

    pub fn with_sync_interval(mut self, interval: Duration) -> Self {
        self.sync_interval = interval;
        self
    }

    pub fn with_locale(mut self, locale: impl Into<String>) -> Self {
        self.locale = Some(locale.into());
        self
    }

    /// Reads the host (required), sync interval and locale from the environment.
    pub fn from_env() -> Result<Self> {
        let host_name = std::env::var(HOST_ENV)
            .ok()
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .ok_or_else(|| Error::config(format!("{} not configured", HOST_ENV)))?;
        let mut config = Self::new(host_name);

        if let Some(secs) = std::env::var(SYNC_INTERVAL_ENV)
            .ok()
            .filter(|v| !v.trim().is_empty())
        {
            let secs: u64 = secs.trim().parse().map_err(|_| {
                Error::config(format!("{} must be a whole number of seconds", SYNC_INTERVAL_ENV))
            })?;
            config.sync_interval = Duration::from_secs(secs.max(1));
        }

        config.locale = std::env::var(LOCALE_ENV)
            .ok()
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty());
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.host_name.is_empty() {
            return Err(Error::config("Host name is empty"));
        }
        if self.sync_interval.is_zero() {
            return Err(Error::config("Sync interval must be positive"));
        }
        Ok(())
    }
}
