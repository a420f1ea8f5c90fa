use std::future::pending;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::time::{interval_at, sleep, Instant, Interval, MissedTickBehavior, Sleep};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::clients::{RefreshFuture, RefreshedTokens, TokenRefresher};
use crate::models::{decode, MessageClass, SendMessage, SessionError, SessionEvent, SessionSnapshot};
use crate::session::machine::{Action, ConnectionMachine, Event};
use crate::session::options::SessionOptions;
use crate::session::outbound::{Dispatch, OutboundDispatcher};
use crate::session::shared_state::{Applied, SharedState};
use crate::ws::{Connector, SocketEvent, SocketEvents, SocketHandle};

/// Requests from the session handle to its driver
#[derive(Debug)]
pub(crate) enum Command {
    Connect,
    Disconnect,
    SetAccessToken(String),
    Send(SendMessage),
}

/// Owns all mutable session state and runs every timer, socket event and
/// command on one task, so nothing here is shared or locked.
pub(crate) struct Driver {
    session_id: Uuid,
    document_id: String,
    machine: ConnectionMachine,
    outbound: OutboundDispatcher,
    shared: SharedState,
    connector: Arc<dyn Connector>,
    refresher: Arc<dyn TokenRefresher>,
    heartbeat_every: Duration,
    prune_every: Duration,

    socket: Option<SocketHandle>,
    conn_seq: u64,
    socket_tx: mpsc::UnboundedSender<(u64, SocketEvent)>,
    socket_rx: mpsc::UnboundedReceiver<(u64, SocketEvent)>,

    retry: Option<Pin<Box<Sleep>>>,
    heartbeat: Option<Interval>,
    prune: Option<Interval>,
    refresh: Option<RefreshFuture>,

    snapshot_tx: watch::Sender<SessionSnapshot>,
    events_tx: broadcast::Sender<SessionEvent>,
}

impl Driver {
    pub(crate) fn new(
        session_id: Uuid,
        options: SessionOptions,
        connector: Arc<dyn Connector>,
        refresher: Arc<dyn TokenRefresher>,
        snapshot_tx: watch::Sender<SessionSnapshot>,
        events_tx: broadcast::Sender<SessionEvent>,
    ) -> Self {
        let machine = ConnectionMachine::new(
            options.endpoint,
            options.reconnect,
            options.document_id.clone(),
            options.access_token,
            options.refresh_token,
        );
        let (socket_tx, socket_rx) = mpsc::unbounded_channel();

        Self {
            session_id,
            document_id: options.document_id,
            machine,
            outbound: OutboundDispatcher::new(options.compact_selections),
            shared: SharedState::default(),
            connector,
            refresher,
            heartbeat_every: options.heartbeat_interval,
            prune_every: options.prune_interval,
            socket: None,
            conn_seq: 0,
            socket_tx,
            socket_rx,
            retry: None,
            heartbeat: None,
            prune: None,
            refresh: None,
            snapshot_tx,
            events_tx,
        }
    }

    pub(crate) async fn run(mut self, mut commands: mpsc::UnboundedReceiver<Command>) {
        info!("Session {} started for document {}", self.session_id, self.document_id);
        loop {
            tokio::select! {
                cmd = commands.recv() => match cmd {
                    Some(cmd) => self.on_command(cmd),
                    // Every handle is gone
                    None => {
                        self.apply(Event::Stop);
                        self.publish();
                        break;
                    }
                },
                Some((conn_id, event)) = self.socket_rx.recv() => self.on_socket_event(conn_id, event),
                _ = wait_retry(&mut self.retry) => {
                    self.retry = None;
                    self.apply(Event::RetryElapsed);
                }
                _ = tick(&mut self.heartbeat) => self.send(SendMessage::ping_now()),
                _ = tick(&mut self.prune) => {
                    let removed = self.shared.prune();
                    if removed > 0 {
                        debug!("Pruned {} stale pointer/selection entries", removed);
                    }
                }
                result = wait_refresh(&mut self.refresh) => {
                    self.refresh = None;
                    self.on_refresh_result(result);
                }
            }
            self.publish();
        }
        info!("Session {} for document {} ended", self.session_id, self.document_id);
    }

    fn on_command(&mut self, cmd: Command) {
        match cmd {
            Command::Connect => self.apply(Event::Connect),
            Command::Disconnect => self.apply(Event::Stop),
            Command::SetAccessToken(token) => self.apply(Event::TokenUpdated(token)),
            Command::Send(msg) => self.send(msg),
        }
    }

    fn on_socket_event(&mut self, conn_id: u64, event: SocketEvent) {
        if conn_id != self.conn_seq || self.socket.is_none() {
            debug!("Ignoring {:?} from superseded connection {}", event, conn_id);
            return;
        }
        match event {
            SocketEvent::Opened => self.apply(Event::Opened),
            SocketEvent::Message(text) => self.on_frame(&text),
            SocketEvent::Error(e) => {
                warn!("Connection {} for document {} errored: {}", conn_id, self.document_id, e);
                self.apply(Event::Errored);
            }
            SocketEvent::Closed { code, unsent } => {
                self.socket = None;
                self.requeue_unsent(unsent);
                self.apply(Event::Closed(code));
            }
        }
    }

    fn on_frame(&mut self, text: &str) {
        let msg = match decode(text) {
            Ok(msg) => msg,
            Err(e) => {
                warn!("Discarding frame for document {}: {}", self.document_id, e);
                return;
            }
        };
        match self.shared.apply(msg) {
            Applied::PresenceChanged => {
                self.emit(SessionEvent::PresenceChanged(self.shared.roster().to_vec()));
            }
            Applied::Edited(edit) => self.emit(SessionEvent::RemoteEdit(edit)),
            Applied::Diagnostic(message) => self.emit(SessionEvent::ServerError(message)),
            Applied::PointerMoved | Applied::SelectionChanged | Applied::Unchanged => {}
        }
    }

    fn on_refresh_result(&mut self, result: Result<RefreshedTokens, SessionError>) {
        match result {
            Ok(tokens) => self.apply(Event::RefreshSucceeded {
                access_token: tokens.access_token,
                refresh_token: tokens.refresh_token,
            }),
            Err(e) => self.apply(Event::RefreshFailed(e.to_string())),
        }
    }

    fn apply(&mut self, event: Event) {
        let before = self.machine.state();
        for action in self.machine.handle(event) {
            self.execute(action);
        }
        let after = self.machine.state();
        if before != after {
            debug!("Document {} connection {:?} -> {:?}", self.document_id, before, after);
            self.emit(SessionEvent::StateChanged(after));
        }
    }

    fn execute(&mut self, action: Action) {
        match action {
            Action::OpenSocket(url) => {
                self.conn_seq += 1;
                info!("Opening connection {} for document {}", self.conn_seq, self.document_id);
                let events = SocketEvents::new(self.conn_seq, self.socket_tx.clone());
                self.socket = Some(self.connector.connect(url, events));
            }
            Action::CloseSocket(code) => {
                if let Some(socket) = self.socket.take() {
                    socket.close(code);
                }
            }
            Action::ScheduleRetry(delay) => self.retry = Some(Box::pin(sleep(delay))),
            Action::CancelRetry => self.retry = None,
            Action::RequestRefresh(credential) => {
                self.refresh = Some(self.refresher.refresh(credential));
            }
            Action::CancelRefresh => self.refresh = None,
            Action::FlushQueue => self.flush(),
            Action::StartHeartbeat => self.heartbeat = periodic(self.heartbeat_every, "heartbeat"),
            Action::StopHeartbeat => self.heartbeat = None,
            Action::StartPruning => self.prune = periodic(self.prune_every, "pruning"),
            Action::StopPruning => self.prune = None,
            Action::ClearSharedState => {
                let had_viewers = !self.shared.roster().is_empty();
                self.shared.clear();
                if had_viewers {
                    self.emit(SessionEvent::PresenceChanged(Vec::new()));
                }
            }
            Action::ReportRefreshFailure(reason) => self.emit(SessionEvent::RefreshFailed(reason)),
        }
    }

    fn send(&mut self, msg: SendMessage) {
        let is_open = self.machine.is_open() && self.socket.is_some();
        match self.outbound.dispatch(&msg, is_open) {
            Dispatch::Send(text) => {
                let delivered = self.socket.as_ref().is_some_and(|s| s.send_text(text));
                if !delivered {
                    // Connection went away underneath us; durable intent must survive
                    self.outbound.dispatch(&msg, false);
                }
            }
            Dispatch::Queued => debug!("Queued {:?} until reconnect ({} pending)", msg, self.outbound.len()),
            Dispatch::Dropped => {}
        }
    }

    fn flush(&mut self) {
        let pending = self.outbound.drain();
        if pending.is_empty() {
            return;
        }
        info!("Flushing {} queued messages for document {}", pending.len(), self.document_id);

        let Some(socket) = self.socket.as_ref() else {
            self.outbound.requeue_front(pending);
            return;
        };
        let mut pending = pending.into_iter();
        while let Some(text) = pending.next() {
            if !socket.send_text(text.clone()) {
                let mut unsent = vec![text];
                unsent.extend(pending);
                warn!("Connection dropped mid-flush, {} messages requeued", unsent.len());
                self.outbound.requeue_front(unsent);
                return;
            }
        }
    }

    /// Durable frames the socket accepted but never wrote go back ahead of everything queued since
    fn requeue_unsent(&mut self, unsent: Vec<String>) {
        let durable: Vec<String> = unsent
            .into_iter()
            .filter(|text| {
                serde_json::from_str::<SendMessage>(text).is_ok_and(|msg| msg.class() == MessageClass::Durable)
            })
            .collect();
        if !durable.is_empty() {
            warn!("{} messages for document {} were not written, requeued", durable.len(), self.document_id);
            self.outbound.requeue_front(durable);
        }
    }

    fn emit(&self, event: SessionEvent) {
        // No subscribers is fine
        let _ = self.events_tx.send(event);
    }

    fn publish(&self) {
        let snapshot = SessionSnapshot {
            document_id: self.document_id.clone(),
            state: self.machine.state(),
            reconnect_attempts: self.machine.attempts(),
            roster: self.shared.roster().to_vec(),
            pointers: self.shared.pointers().clone(),
            selections: self.shared.selections().clone(),
            last_edit: self.shared.last_edit().cloned(),
            queued: self.outbound.len(),
        };
        self.snapshot_tx.send_if_modified(|current| {
            if *current == snapshot {
                return false;
            }
            *current = snapshot;
            true
        });
    }
}

/// Interval whose first tick is one full period away
fn periodic(every: Duration, what: &str) -> Option<Interval> {
    if every.is_zero() {
        warn!("Zero {} interval, timer disabled", what);
        return None;
    }
    let mut interval = interval_at(Instant::now() + every, every);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    Some(interval)
}

async fn wait_retry(retry: &mut Option<Pin<Box<Sleep>>>) {
    match retry {
        Some(sleep) => sleep.as_mut().await,
        None => pending().await,
    }
}

async fn tick(interval: &mut Option<Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => pending().await,
    }
}

async fn wait_refresh(refresh: &mut Option<RefreshFuture>) -> Result<RefreshedTokens, SessionError> {
    match refresh {
        Some(fut) => fut.as_mut().await,
        None => pending().await,
    }
}
