use std::time::Duration;
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DurationMilliSeconds};
use thiserror::Error;
use tracing::{info, error};

/// Session client configuration
#[serde_as]
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    /// Collaboration server host, optionally with port
    #[serde(default = "default_host")]
    pub collab_host: String,

    /// Use `wss` instead of `ws`
    #[serde(default)]
    pub collab_secure: bool,

    /// Document to join
    pub collab_document_id: Option<String>,

    /// Externally issued access token
    pub collab_access_token: Option<String>,

    /// Credential used to renew an expired access token
    pub collab_refresh_token: Option<String>,

    /// Endpoint of the token refresh service
    pub collab_refresh_url: Option<String>,

    #[serde_as(as = "DurationMilliSeconds<u64>")]
    #[serde(default = "default_reconnect_base")]
    pub reconnect_base_ms: Duration,

    #[serde_as(as = "DurationMilliSeconds<u64>")]
    #[serde(default = "default_reconnect_cap")]
    pub reconnect_cap_ms: Duration,

    #[serde(default = "default_reconnect_max_attempts")]
    pub reconnect_max_attempts: u32,

    #[serde_as(as = "DurationMilliSeconds<u64>")]
    #[serde(default = "default_heartbeat_interval")]
    pub heartbeat_interval_ms: Duration,

    #[serde_as(as = "DurationMilliSeconds<u64>")]
    #[serde(default = "default_prune_interval")]
    pub prune_interval_ms: Duration,

    /// Collapse repeated offline selection changes to the latest one
    #[serde(default)]
    pub compact_selections: bool,
}

impl Config {
    /// Load configuration from environment variables or app.env file
    pub fn load() -> Result<Self, ConfigError> {
        // Try to load from app.env file first
        if std::path::Path::new("app.env").exists() {
            dotenvy::from_filename("app.env").ok();
        } else {
            // Fallback to .env file
            dotenvy::dotenv().ok();
        }

        match envy::from_env::<Config>() {
            Ok(config) => {
                info!("✅ Configuration loaded successfully");
                Ok(config)
            }
            Err(e) => {
                error!("❌ Failed to load configuration: {}", e);
                Err(ConfigError::EnvError(e))
            }
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            collab_host: default_host(),
            collab_secure: false,
            collab_document_id: None,
            collab_access_token: None,
            collab_refresh_token: None,
            collab_refresh_url: None,
            reconnect_base_ms: default_reconnect_base(),
            reconnect_cap_ms: default_reconnect_cap(),
            reconnect_max_attempts: default_reconnect_max_attempts(),
            heartbeat_interval_ms: default_heartbeat_interval(),
            prune_interval_ms: default_prune_interval(),
            compact_selections: false,
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Environment variable error: {0}")]
    EnvError(#[from] envy::Error),
}

// Default value functions
fn default_host() -> String {
    "localhost:8000".to_string()
}

fn default_reconnect_base() -> Duration {
    Duration::from_millis(1_000)
}

fn default_reconnect_cap() -> Duration {
    Duration::from_millis(30_000)
}

fn default_reconnect_max_attempts() -> u32 {
    5
}

fn default_heartbeat_interval() -> Duration {
    Duration::from_secs(30)
}

fn default_prune_interval() -> Duration {
    Duration::from_secs(5)
}
