//! Client for per-document real-time collaboration sessions.
//!
//! A [`CollabSession`] keeps one WebSocket connection to the collaboration
//! server for a document, tracks who else is present and what they point at,
//! select and edit, and keeps durable intents queued across disconnects.

pub mod clients;
pub mod config;
pub mod models;
pub mod session;
pub mod ws;

pub use clients::{HttpTokenRefresher, NoRefresh, TokenRefresher};
pub use models::{ConnectionState, SessionError, SessionEvent, SessionSnapshot};
pub use session::{CollabSession, ReconnectPolicy, SessionOptions};
pub use ws::{Connector, Endpoint, WsConnector};
