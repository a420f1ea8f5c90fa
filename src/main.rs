use std::panic;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, error, warn};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use colabri_session::config::Config;
use colabri_session::{
    CollabSession, HttpTokenRefresher, NoRefresh, SessionEvent, SessionOptions, TokenRefresher, WsConnector,
};

#[tokio::main(flavor = "current_thread")]
async fn main() {

    // Set panic hook for better error messages
    panic::set_hook(Box::new(|info| {
        eprintln!("PANIC: {info}");
    }));

    // Initialize tracing
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            // Default to info level, but allow debug for our crate
            "colabri_session=debug,info".into()
        }))
        .init();

    // Load configuration
    let config = Config::load().unwrap_or_else(|e| {
        error!("Failed to load configuration: {}", e);
        warn!("Using default configuration");
        Config::default()
    });

    let refresher: Arc<dyn TokenRefresher> = match &config.collab_refresh_url {
        Some(url) => match HttpTokenRefresher::new(url.clone()) {
            Ok(refresher) => Arc::new(refresher),
            Err(e) => {
                error!("Token refresh disabled: {}", e);
                Arc::new(NoRefresh)
            }
        },
        None => {
            warn!("No refresh URL configured - expired tokens will end the session");
            Arc::new(NoRefresh)
        }
    };

    let options = SessionOptions::from_config(&config);
    let endpoint = options.endpoint.clone();
    let document_id = options.document_id.clone();
    let session = CollabSession::spawn(options, Arc::new(WsConnector), refresher);
    let mut events = session.subscribe();

    if let Err(e) = session.connect() {
        error!("Failed to start session: {}", e);
        return;
    }
    info!("📡 Joining document {} on {}", document_id, endpoint);

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted, leaving document");
                break;
            }
            event = events.recv() => match event {
                Ok(SessionEvent::StateChanged(state)) => info!("Connection state: {:?}", state),
                Ok(SessionEvent::PresenceChanged(viewers)) => {
                    let names: Vec<&str> = viewers.iter().map(|v| v.label()).collect();
                    info!("👥 {} viewing: {}", names.len(), names.join(", "));
                }
                Ok(SessionEvent::RemoteEdit(edit)) => {
                    info!("✏️ {} {} {} - re-fetch needed", edit.username, edit.action, edit.entity);
                }
                Ok(SessionEvent::ServerError(message)) => warn!("Server error: {}", message),
                Ok(SessionEvent::RefreshFailed(reason)) => {
                    error!("Could not renew access token: {}", reason);
                }
                Err(RecvError::Lagged(skipped)) => warn!("Skipped {} session events", skipped),
                Err(RecvError::Closed) => break,
            }
        }
    }

    session.shutdown().await;
}
