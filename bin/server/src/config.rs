//! Centralized server configuration.
//!
//! Loaded via the `config` crate from an optional `casdoor-sso.toml` file
//! and environment variables, with `__` separating nested keys
//! (e.g. `CASDOOR__CLIENT_ID`, `SITE__HOME_URL`).
//!
//! See [`ProviderConfig`] for the Casdoor settings and [`HostSite`] for the
//! site URLs. Both are validated while deserializing, so a malformed URL
//! fails startup.

use casdoor_sso_relying_party::{HostSite, ProviderConfig};
use serde::Deserialize;

/// Base name of the optional configuration file.
pub const CONFIG_FILE: &str = "casdoor-sso";

/// Server configuration composed from library configs.
#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    /// PostgreSQL database connection URL.
    pub database_url: String,

    /// Address the HTTP listener binds to.
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,

    /// Canonical URLs of this site.
    pub site: HostSite,

    /// Session configuration.
    #[serde(default)]
    pub session: SessionConfig,

    /// Casdoor provider configuration.
    pub casdoor: ProviderConfig,
}

fn default_listen_addr() -> String {
    "127.0.0.1:3000".to_string()
}

/// Session-related configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct SessionConfig {
    /// Host session duration in minutes.
    #[serde(default = "default_session_duration_minutes")]
    pub duration_minutes: i64,

    /// Interval between expired-session cleanup runs, in seconds.
    #[serde(default = "default_cleanup_interval_seconds")]
    pub cleanup_interval_seconds: u64,
}

fn default_session_duration_minutes() -> i64 {
    24 * 60
}

fn default_cleanup_interval_seconds() -> u64 {
    300
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            duration_minutes: default_session_duration_minutes(),
            cleanup_interval_seconds: default_cleanup_interval_seconds(),
        }
    }
}

impl SessionConfig {
    #[must_use]
    pub fn duration(&self) -> chrono::Duration {
        chrono::Duration::minutes(self.duration_minutes)
    }

    /// Interval between cleanup runs, never shorter than one second.
    #[must_use]
    pub fn cleanup_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.cleanup_interval_seconds.max(1))
    }
}

impl ServerConfig {
    /// Loads configuration from the optional file and the environment.
    ///
    /// Environment variables take precedence over the file.
    ///
    /// # Errors
    ///
    /// Returns an error if required configuration is missing or invalid.
    pub fn from_env() -> Result<Self, config::ConfigError> {
        config::Config::builder()
            .add_source(config::File::with_name(CONFIG_FILE).required(false))
            .add_source(
                config::Environment::default()
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()
    }
}
