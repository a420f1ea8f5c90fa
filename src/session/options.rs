use std::time::Duration;

use crate::config::Config;
use crate::session::machine::ReconnectPolicy;
use crate::ws::Endpoint;

/// Everything a session needs to join one document
#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub document_id: String,
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
    pub endpoint: Endpoint,
    pub reconnect: ReconnectPolicy,
    pub heartbeat_interval: Duration,
    pub prune_interval: Duration,
    pub compact_selections: bool,
}

impl SessionOptions {
    pub fn new(document_id: impl Into<String>, endpoint: Endpoint) -> Self {
        Self {
            document_id: document_id.into(),
            access_token: None,
            refresh_token: None,
            endpoint,
            reconnect: ReconnectPolicy::default(),
            heartbeat_interval: Duration::from_secs(30),
            prune_interval: Duration::from_secs(5),
            compact_selections: false,
        }
    }

    pub fn with_access_token(mut self, token: impl Into<String>) -> Self {
        self.access_token = Some(token.into());
        self
    }

    pub fn with_refresh_token(mut self, token: impl Into<String>) -> Self {
        self.refresh_token = Some(token.into());
        self
    }

    pub fn from_config(config: &Config) -> Self {
        Self {
            document_id: config.collab_document_id.clone().unwrap_or_default(),
            access_token: config.collab_access_token.clone(),
            refresh_token: config.collab_refresh_token.clone(),
            endpoint: Endpoint::new(config.collab_host.clone(), config.collab_secure),
            reconnect: ReconnectPolicy {
                base: config.reconnect_base_ms,
                cap: config.reconnect_cap_ms,
                max_attempts: config.reconnect_max_attempts,
            },
            heartbeat_interval: config.heartbeat_interval_ms,
            prune_interval: config.prune_interval_ms,
            compact_selections: config.compact_selections,
        }
    }
}
