use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{info, Instrument};
use uuid::Uuid;

use crate::clients::TokenRefresher;
use crate::models::{PointerPosition, SendMessage, SessionError, SessionEvent, SessionSnapshot};
use crate::session::driver::{Command, Driver};
use crate::session::options::SessionOptions;
use crate::ws::Connector;

const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Handle to a collaboration session for one document.
///
/// The view layer reads snapshots and pushes local intents through this
/// handle; all state lives in a driver task. Dropping the handle stops the
/// session.
pub struct CollabSession {
    id: Uuid,
    commands: mpsc::UnboundedSender<Command>,
    snapshot: watch::Receiver<SessionSnapshot>,
    events: broadcast::Sender<SessionEvent>,
    task: JoinHandle<()>,
}

impl CollabSession {
    /// Create the session and spawn its driver. Nothing connects until [`connect`](Self::connect).
    pub fn spawn(
        options: SessionOptions,
        connector: Arc<dyn Connector>,
        refresher: Arc<dyn TokenRefresher>,
    ) -> Self {
        let id = Uuid::new_v4();
        let (commands, commands_rx) = mpsc::unbounded_channel();
        let (snapshot_tx, snapshot) = watch::channel(SessionSnapshot {
            document_id: options.document_id.clone(),
            ..SessionSnapshot::default()
        });
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        let span = tracing::info_span!("collab_session", session = %id, document = %options.document_id);
        let driver = Driver::new(id, options, connector, refresher, snapshot_tx, events.clone());
        let task = tokio::spawn(driver.run(commands_rx).instrument(span));

        Self { id, commands, snapshot, events, task }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Start connecting. Ignored while an attempt, retry or token renewal is pending.
    pub fn connect(&self) -> Result<(), SessionError> {
        self.command(Command::Connect)
    }

    /// Stop the session: cancel timers and renewal, close the socket, forget shared state.
    /// Safe to call repeatedly.
    pub fn disconnect(&self) -> Result<(), SessionError> {
        self.command(Command::Disconnect)
    }

    /// Hand over a newly issued access token for the next connection attempt
    pub fn set_access_token(&self, token: impl Into<String>) -> Result<(), SessionError> {
        self.command(Command::SetAccessToken(token.into()))
    }

    /// Share the local pointer position. Dropped while disconnected.
    pub fn move_pointer(&self, x: f64, y: f64) -> Result<(), SessionError> {
        self.command(Command::Send(SendMessage::Cursor { position: PointerPosition { x, y } }))
    }

    /// Share the locally focused entity. Queued while disconnected.
    pub fn select(&self, entity_id: Option<String>) -> Result<(), SessionError> {
        self.command(Command::Send(SendMessage::Selection { entity_id }))
    }

    /// Tell peers an entity changed so they re-fetch it. Queued while disconnected.
    pub fn notify_edit(
        &self,
        entity: impl Into<String>,
        action: impl Into<String>,
        data: serde_json::Value,
    ) -> Result<(), SessionError> {
        self.command(Command::Send(SendMessage::Edit {
            entity: entity.into(),
            action: action.into(),
            data,
        }))
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.snapshot.borrow().clone()
    }

    /// Receiver notified whenever the snapshot changes
    pub fn watch(&self) -> watch::Receiver<SessionSnapshot> {
        self.snapshot.clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    /// Stop the session and wait for its driver to finish
    pub async fn shutdown(self) {
        let CollabSession { id, commands, task, .. } = self;
        let _ = commands.send(Command::Disconnect);
        drop(commands);
        if let Err(e) = task.await {
            tracing::error!("Session {} driver ended abnormally: {}", id, e);
        }
        info!("Session {} shut down", id);
    }

    fn command(&self, cmd: Command) -> Result<(), SessionError> {
        self.commands.send(cmd).map_err(|_| SessionError::DriverGone)
    }
}

impl std::fmt::Debug for CollabSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CollabSession")
            .field("id", &self.id)
            .field("state", &self.snapshot.borrow().state)
            .finish()
    }
}
