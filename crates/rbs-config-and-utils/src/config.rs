//! Configuration management for the client.

use crate::{CoreError, CoreResult, Endpoints, Paths, Region};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Default log level.
pub const DEFAULT_LOG_LEVEL: &str = "info";

/// Seconds before access-token expiry at which a refresh becomes due.
pub const DEFAULT_REFRESH_SKEW_SECS: i64 = 30;

/// Default bound on concurrently running fire-and-forget actions.
const DEFAULT_MAX_IN_FLIGHT_ACTIONS: usize = 16;

/// Reconnect backoff settings for the realtime connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconnectConfig {
    /// Delay before the first reconnect attempt in milliseconds.
    pub initial_delay_ms: u64,
    /// Upper bound for the delay between attempts in milliseconds.
    pub max_delay_ms: u64,
    /// Attempts before giving up. `None` retries forever.
    pub max_attempts: Option<u32>,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay_ms: 500,
            max_delay_ms: 30_000,
            max_attempts: Some(10),
        }
    }
}

/// Main client configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// RBS project identifier.
    #[serde(default)]
    pub project_id: String,
    /// Backend region.
    #[serde(default)]
    pub region: Region,
    /// Keep a realtime connection open alongside the session.
    #[serde(default)]
    pub socket_enabled: bool,
    /// Log level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Refresh the access token this many seconds before it expires.
    #[serde(default = "default_refresh_skew_secs")]
    pub refresh_skew_secs: i64,
    /// Bound on concurrently running fire-and-forget actions.
    #[serde(default = "default_max_in_flight_actions")]
    pub max_in_flight_actions: usize,
    /// Realtime reconnect backoff.
    #[serde(default)]
    pub reconnect: ReconnectConfig,
    /// Override for the GET/token base URL.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub get_url: Option<String>,
    /// Override for the POST base URL.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub post_url: Option<String>,
    /// Override for the realtime socket URL.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub socket_url: Option<String>,
}

fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}

fn default_refresh_skew_secs() -> i64 {
    DEFAULT_REFRESH_SKEW_SECS
}

fn default_max_in_flight_actions() -> usize {
    DEFAULT_MAX_IN_FLIGHT_ACTIONS
}

impl Default for Config {
    fn default() -> Self {
        Self {
            project_id: String::new(),
            region: Region::default(),
            socket_enabled: false,
            log_level: DEFAULT_LOG_LEVEL.to_string(),
            refresh_skew_secs: DEFAULT_REFRESH_SKEW_SECS,
            max_in_flight_actions: DEFAULT_MAX_IN_FLIGHT_ACTIONS,
            reconnect: ReconnectConfig::default(),
            get_url: None,
            post_url: None,
            socket_url: None,
        }
    }
}

impl Config {
    /// Create a configuration for a project with default values.
    pub fn for_project(project_id: impl Into<String>, region: Region) -> Self {
        Self {
            project_id: project_id.into(),
            region,
            ..Self::default()
        }
    }

    /// Load configuration from the config file, falling back to defaults,
    /// then apply environment overrides.
    pub fn load(paths: &Paths) -> CoreResult<Self> {
        let config_path = paths.config_file();

        let mut config = if config_path.exists() {
            Self::load_from_file(&config_path)?
        } else {
            Self::default()
        };

        config.load_from_env()?;
        Ok(config)
    }

    /// Load configuration from a specific file.
    pub fn load_from_file(path: &Path) -> CoreResult<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to the config file.
    pub fn save(&self, paths: &Paths) -> CoreResult<()> {
        paths.ensure_dirs()?;
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(paths.config_file(), content)?;
        Ok(())
    }

    /// Override configuration from `RBS_*` environment variables.
    fn load_from_env(&mut self) -> CoreResult<()> {
        if let Ok(project_id) = std::env::var("RBS_PROJECT_ID") {
            self.project_id = project_id;
        }
        if let Ok(region) = std::env::var("RBS_REGION") {
            self.region = region.parse()?;
        }
        if let Ok(log_level) = std::env::var("RBS_LOG_LEVEL") {
            self.log_level = log_level;
        }
        if let Ok(enabled) = std::env::var("RBS_SOCKET_ENABLED") {
            self.socket_enabled = matches!(
                enabled.trim().to_ascii_lowercase().as_str(),
                "1" | "true" | "yes" | "on"
            );
        }
        Ok(())
    }

    /// Check that the configuration can drive a client.
    pub fn validate(&self) -> CoreResult<()> {
        if self.project_id.trim().is_empty() {
            return Err(CoreError::Config("project_id must not be empty".to_string()));
        }
        if self.refresh_skew_secs < 0 {
            return Err(CoreError::Config(
                "refresh_skew_secs must not be negative".to_string(),
            ));
        }
        if let Err(e) = self.log_level.parse::<tracing::Level>() {
            return Err(CoreError::Config(format!(
                "log_level {:?}: {}",
                self.log_level, e
            )));
        }
        if self.max_in_flight_actions == 0 {
            return Err(CoreError::Config(
                "max_in_flight_actions must be at least 1".to_string(),
            ));
        }
        self.endpoints()?;
        Ok(())
    }

    /// Resolve the endpoint set for the configured region and overrides.
    pub fn endpoints(&self) -> CoreResult<Endpoints> {
        Endpoints::resolve(
            self.region,
            self.get_url.as_deref(),
            self.post_url.as_deref(),
            self.socket_url.as_deref(),
        )
    }
}
