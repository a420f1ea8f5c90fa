use std::collections::HashMap;
use serde::Serialize;
use crate::models::{EditNotification, PointerPosition, PresenceUser, SelectionEntry};

/// Lifecycle of the session's physical connection
#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ConnectionState {
    /// Not started, or stopped on purpose
    #[default]
    Idle,
    Connecting,
    Open,
    /// Socket is down; a retry or a token refresh may be pending
    Closed { code: Option<u16> },
    /// Retry ceiling reached; only an explicit connect starts over
    GaveUp { code: Option<u16> },
}

impl ConnectionState {
    pub fn is_open(&self) -> bool {
        matches!(self, ConnectionState::Open)
    }
}

/// Read-only view of a session handed to the owning view layer
#[derive(Serialize, Debug, Clone, Default, PartialEq)]
pub struct SessionSnapshot {
    pub document_id: String,
    pub state: ConnectionState,
    pub reconnect_attempts: u32,
    pub roster: Vec<PresenceUser>,
    pub pointers: HashMap<String, PointerPosition>,
    pub selections: HashMap<String, SelectionEntry>,
    pub last_edit: Option<EditNotification>,
    pub queued: usize,
}

/// Notifications broadcast to observers of a session
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    StateChanged(ConnectionState),
    PresenceChanged(Vec<PresenceUser>),
    RemoteEdit(EditNotification),
    /// An `error` envelope from the server
    ServerError(String),
    /// Renewal after an auth-expiry close failed; the session stays closed
    RefreshFailed(String),
}
