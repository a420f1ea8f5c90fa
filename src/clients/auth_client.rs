use std::future::Future;
use std::pin::Pin;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{error, info};

use crate::models::SessionError;

pub type RefreshFuture = Pin<Box<dyn Future<Output = Result<RefreshedTokens, SessionError>> + Send>>;

/// Tokens returned by a successful renewal
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefreshedTokens {
    pub access_token: String,
    /// Rotated refresh credential, when the service issues one
    #[serde(default)]
    pub refresh_token: Option<String>,
}

/// Renews an expired access token.
///
/// `credential` is the refresh token when one is known, otherwise the
/// access token that just expired.
pub trait TokenRefresher: Send + Sync + 'static {
    fn refresh(&self, credential: String) -> RefreshFuture;
}

/// Refresher that calls the auth service over HTTP
#[derive(Debug, Clone)]
pub struct HttpTokenRefresher {
    client: Client,
    refresh_url: String,
}

impl HttpTokenRefresher {
    pub fn new(refresh_url: String) -> Result<Self, SessionError> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .build()
            .map_err(|e| SessionError::Refresh(format!("failed to build http client: {}", e)))?;

        Ok(Self { client, refresh_url })
    }
}

impl TokenRefresher for HttpTokenRefresher {
    fn refresh(&self, credential: String) -> RefreshFuture {
        let client = self.client.clone();
        let url = self.refresh_url.clone();
        Box::pin(async move {
            info!("Refreshing access token at {}", url);
            let response = client
                .post(&url)
                .header("Authorization", format!("Bearer {}", credential))
                .send()
                .await
                .and_then(|r| r.error_for_status())
                .map_err(|e| {
                    error!("Token refresh request failed: {}", e);
                    SessionError::Refresh(e.to_string())
                })?;

            let tokens: RefreshedTokens = response.json().await.map_err(|e| {
                error!("Token refresh response unreadable: {}", e);
                SessionError::Refresh(e.to_string())
            })?;

            if tokens.access_token.is_empty() {
                return Err(SessionError::Refresh("empty access token".to_string()));
            }
            Ok(tokens)
        })
    }
}

/// Refresher for deployments without a renewal endpoint; always fails
#[derive(Debug, Default, Clone)]
pub struct NoRefresh;

impl TokenRefresher for NoRefresh {
    fn refresh(&self, _credential: String) -> RefreshFuture {
        Box::pin(async { Err(SessionError::Refresh("no refresh endpoint configured".to_string())) })
    }
}
