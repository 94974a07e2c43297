//! Configuration loading and management

use anyhow::{Result, bail};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Environment variable overriding [`ClientConfig::api_base_url`]
pub const ENV_API_BASE_URL: &str = "VECTORDOCS_API_BASE_URL";

/// Environment variable overriding [`ClientConfig::ws_url`]
pub const ENV_WS_URL: &str = "VECTORDOCS_WS_URL";

/// Reconnection backoff parameters
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReconnectConfig {
    /// Delay of the first reconnect attempt, before halving and jitter
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    /// Upper bound of the exponential delay
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    /// Share of the delay added as random jitter (0.0–1.0)
    #[serde(default = "default_jitter_factor")]
    pub jitter_factor: f64,
}

fn default_base_delay_ms() -> u64 {
    500
}

fn default_max_delay_ms() -> u64 {
    30_000
}

fn default_jitter_factor() -> f64 {
    0.3
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            jitter_factor: default_jitter_factor(),
        }
    }
}

impl ReconnectConfig {
    /// Base delay as a `Duration`
    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    /// Maximum delay as a `Duration`
    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }
}

/// Complete configuration for the live client
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Base URL of the REST gateway (e.g., "http://localhost:8080")
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,

    /// Notification socket endpoint
    #[serde(default = "default_ws_url")]
    pub ws_url: String,

    /// Backoff parameters for the shared connection
    #[serde(default)]
    pub reconnect: ReconnectConfig,

    /// Number of prior chat turns sent along with a query
    #[serde(default = "default_context_window")]
    pub context_window: usize,

    /// Capacity of the local event bus
    #[serde(default = "default_event_buffer")]
    pub event_buffer: usize,

    /// Keep the socket open with zero consumers while authenticated
    #[serde(default)]
    pub linger_when_idle: bool,

    /// Where the chat transcript is persisted (None = memory only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub history_path: Option<PathBuf>,
}

fn default_api_base_url() -> String {
    "http://localhost:8080".to_string()
}

fn default_ws_url() -> String {
    "ws://localhost:8080/api/ws/notifications".to_string()
}

fn default_context_window() -> usize {
    8
}

fn default_event_buffer() -> usize {
    1024
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_base_url: default_api_base_url(),
            ws_url: default_ws_url(),
            reconnect: ReconnectConfig::default(),
            context_window: default_context_window(),
            event_buffer: default_event_buffer(),
            linger_when_idle: false,
            history_path: None,
        }
    }
}

impl ClientConfig {
    /// Load configuration from a YAML file
    pub fn from_yaml_file(path: &str) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&content)
    }

    /// Load configuration from a YAML string
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Override endpoints from the process environment
    pub fn apply_env_overrides(mut self) -> Self {
        if let Ok(url) = std::env::var(ENV_API_BASE_URL)
            && !url.trim().is_empty()
        {
            self.api_base_url = url.trim().to_string();
        }
        if let Ok(url) = std::env::var(ENV_WS_URL)
            && !url.trim().is_empty()
        {
            self.ws_url = url.trim().to_string();
        }
        self
    }

    /// Endpoint receiving chat queries
    pub fn search_endpoint(&self) -> String {
        format!("{}/api/search", self.api_base_url.trim_end_matches('/'))
    }

    /// Check that the configuration is usable
    pub fn validate(&self) -> Result<()> {
        if self.api_base_url.trim().is_empty() {
            bail!("api_base_url must not be empty");
        }
        if !(self.ws_url.starts_with("ws://") || self.ws_url.starts_with("wss://")) {
            bail!("ws_url must use the ws:// or wss:// scheme, got '{}'", self.ws_url);
        }
        if self.reconnect.max_delay_ms < self.reconnect.base_delay_ms {
            bail!(
                "reconnect.max_delay_ms ({}) is lower than reconnect.base_delay_ms ({})",
                self.reconnect.max_delay_ms,
                self.reconnect.base_delay_ms
            );
        }
        if !(0.0..=1.0).contains(&self.reconnect.jitter_factor) {
            bail!(
                "reconnect.jitter_factor must be within 0.0..=1.0, got {}",
                self.reconnect.jitter_factor
            );
        }
        if self.context_window == 0 {
            bail!("context_window must be at least 1");
        }
        if self.event_buffer == 0 {
            bail!("event_buffer must be at least 1");
        }
        Ok(())
    }
}
