//! Configuration types and loading
//!
//! Config precedence: env vars > config file > defaults. A missing file is
//! not an error; the client runs against the local API with defaults.
//! Passwords never go in the TOML; they come from the command line or
//! PLANNER_PASSWORD.

use std::path::{Path, PathBuf};
use std::time::Duration;

use common::Secret;
use gateway::GatewayConfig;
use serde::Deserialize;
use session::constants::{DEFAULT_BASE_URL, LOGIN_ROUTE, REFRESH_INTERVAL, REQUEST_TIMEOUT};

/// Root configuration
#[derive(Debug, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub session: SessionConfig,
}

/// Planner API settings
#[derive(Debug, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

/// Local session settings
#[derive(Debug, Deserialize)]
pub struct SessionConfig {
    #[serde(default = "default_storage_path")]
    pub storage_path: PathBuf,
    #[serde(default = "default_refresh_interval")]
    pub refresh_interval_secs: u64,
    #[serde(default = "default_login_route")]
    pub login_route: String,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            timeout_secs: default_timeout(),
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            storage_path: default_storage_path(),
            refresh_interval_secs: default_refresh_interval(),
            login_route: default_login_route(),
        }
    }
}

fn default_base_url() -> String {
    DEFAULT_BASE_URL.to_string()
}

fn default_timeout() -> u64 {
    REQUEST_TIMEOUT.as_secs()
}

fn default_storage_path() -> PathBuf {
    PathBuf::from("planner-session.json")
}

fn default_refresh_interval() -> u64 {
    REFRESH_INTERVAL.as_secs()
}

fn default_login_route() -> String {
    LOGIN_ROUTE.to_string()
}

impl Config {
    /// Load configuration from a TOML file, then overlay environment variables.
    pub fn load(path: &Path) -> common::Result<Self> {
        let mut config: Config = if path.exists() {
            let contents = std::fs::read_to_string(path)?;
            toml::from_str(&contents)?
        } else {
            Config::default()
        };

        if let Ok(url) = std::env::var("PLANNER_API_URL")
            && !url.trim().is_empty()
        {
            config.api.base_url = url.trim().to_owned();
        }

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> common::Result<()> {
        if !self.api.base_url.starts_with("http://") && !self.api.base_url.starts_with("https://")
        {
            return Err(common::Error::Config(format!(
                "base_url must start with http:// or https://, got: {}",
                self.api.base_url
            )));
        }

        if self.api.timeout_secs == 0 {
            return Err(common::Error::Config(
                "timeout_secs must be greater than 0".into(),
            ));
        }

        if self.session.refresh_interval_secs == 0 {
            return Err(common::Error::Config(
                "refresh_interval_secs must be greater than 0".into(),
            ));
        }

        Ok(())
    }

    /// Resolve config file path from CLI arg or CONFIG_PATH env var.
    pub fn resolve_path(cli_path: Option<&str>) -> PathBuf {
        if let Some(p) = cli_path {
            return PathBuf::from(p);
        }
        if let Ok(p) = std::env::var("CONFIG_PATH") {
            return PathBuf::from(p);
        }
        PathBuf::from("planner-client.toml")
    }

    pub fn gateway(&self) -> GatewayConfig {
        GatewayConfig {
            base_url: self.api.base_url.clone(),
            timeout: Duration::from_secs(self.api.timeout_secs),
            login_route: self.session.login_route.clone(),
        }
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.session.refresh_interval_secs)
    }
}

/// Password from the command line, falling back to PLANNER_PASSWORD.
pub fn resolve_password(cli: Option<&str>) -> common::Result<Secret<String>> {
    if let Some(p) = cli {
        return Ok(Secret::from(p));
    }
    match std::env::var("PLANNER_PASSWORD") {
        Ok(p) if !p.is_empty() => Ok(Secret::new(p)),
        _ => Err(common::Error::Config(
            "password required: pass it as an argument or set PLANNER_PASSWORD".into(),
        )),
    }
}
