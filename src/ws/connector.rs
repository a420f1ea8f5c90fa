use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, info, warn};

/// Close code used when the connection drops without a close frame
pub const ABNORMAL_CLOSE: u16 = 1006;

/// What a physical connection reports back to its session
#[derive(Debug, Clone, PartialEq)]
pub enum SocketEvent {
    Opened,
    Message(String),
    Error(String),
    /// The connection ended. `unsent` holds text frames it accepted but never wrote.
    Closed { code: Option<u16>, unsent: Vec<String> },
}

/// Frames a session pushes to a physical connection
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    Text(String),
    Close(u16),
}

/// Socket events tagged with the connection they belong to
#[derive(Debug, Clone)]
pub struct SocketEvents {
    conn_id: u64,
    tx: mpsc::UnboundedSender<(u64, SocketEvent)>,
}

impl SocketEvents {
    pub fn new(conn_id: u64, tx: mpsc::UnboundedSender<(u64, SocketEvent)>) -> Self {
        Self { conn_id, tx }
    }

    pub fn conn_id(&self) -> u64 {
        self.conn_id
    }

    /// Returns false once the session stopped listening
    pub fn emit(&self, event: SocketEvent) -> bool {
        self.tx.send((self.conn_id, event)).is_ok()
    }
}

/// Owning side of one physical connection. Dropping it tears the connection down.
pub struct SocketHandle {
    outbound: mpsc::UnboundedSender<Frame>,
    task: Option<JoinHandle<()>>,
}

impl SocketHandle {
    pub fn new(outbound: mpsc::UnboundedSender<Frame>, task: Option<JoinHandle<()>>) -> Self {
        Self { outbound, task }
    }

    /// Queue a text frame; false if the connection is already gone
    pub fn send_text(&self, text: String) -> bool {
        self.outbound.send(Frame::Text(text)).is_ok()
    }

    /// Ask the connection to close with `code`, letting it flush first
    pub fn close(mut self, code: u16) {
        let _ = self.outbound.send(Frame::Close(code));
        // The task ends on its own after writing the close frame.
        self.task.take();
    }
}

impl Drop for SocketHandle {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

/// Opens physical connections for a session.
///
/// Implementations must report `Opened` once the connection is usable and
/// exactly one `Closed` when it ends, including when it never opened. Text
/// frames accepted by [`SocketHandle::send_text`] that never reached the wire
/// are returned with that `Closed`.
pub trait Connector: Send + Sync + 'static {
    fn connect(&self, url: String, events: SocketEvents) -> SocketHandle;
}

/// Connector backed by tokio-tungstenite
#[derive(Debug, Default, Clone)]
pub struct WsConnector;

impl Connector for WsConnector {
    fn connect(&self, url: String, events: SocketEvents) -> SocketHandle {
        let (tx, rx) = mpsc::unbounded_channel::<Frame>();
        let task = tokio::spawn(run_socket(url, events, rx));
        SocketHandle::new(tx, Some(task))
    }
}

async fn run_socket(url: String, events: SocketEvents, mut outbound: mpsc::UnboundedReceiver<Frame>) {
    let conn_id = events.conn_id();
    let (stream, _) = match connect_async(url.as_str()).await {
        Ok(conn) => conn,
        Err(e) => {
            warn!("Connection {} failed to open: {}", conn_id, e);
            events.emit(SocketEvent::Error(e.to_string()));
            let unsent = take_unsent(&mut outbound);
            events.emit(SocketEvent::Closed { code: Some(ABNORMAL_CLOSE), unsent });
            return;
        }
    };
    info!("Connection {} open", conn_id);
    if !events.emit(SocketEvent::Opened) {
        return;
    }

    let (mut sink, mut stream) = stream.split();
    let mut unsent = Vec::new();
    let close_code = loop {
        tokio::select! {
            frame = outbound.recv() => match frame {
                Some(Frame::Text(text)) => {
                    if let Err(e) = sink.send(Message::text(text.clone())).await {
                        error!("Connection {} failed to send: {}", conn_id, e);
                        events.emit(SocketEvent::Error(e.to_string()));
                        unsent.push(text);
                        break Some(ABNORMAL_CLOSE);
                    }
                }
                Some(Frame::Close(code)) => {
                    let frame = CloseFrame { code: CloseCode::from(code), reason: "".into() };
                    if let Err(e) = sink.send(Message::Close(Some(frame))).await {
                        debug!("Connection {} close frame not delivered: {}", conn_id, e);
                    }
                    break Some(code);
                }
                // Session dropped its handle
                None => {
                    let _ = sink.close().await;
                    break Some(ABNORMAL_CLOSE);
                }
            },
            msg = stream.next() => match msg {
                Some(Ok(Message::Text(text))) => {
                    events.emit(SocketEvent::Message(text.as_str().to_owned()));
                }
                Some(Ok(Message::Close(frame))) => {
                    break Some(frame.map(|f| u16::from(f.code)).unwrap_or(ABNORMAL_CLOSE));
                }
                // Ping/pong frames are answered by tungstenite; binary is not part of the protocol
                Some(Ok(_)) => continue,
                Some(Err(e)) => {
                    warn!("Connection {} errored: {}", conn_id, e);
                    events.emit(SocketEvent::Error(e.to_string()));
                    break Some(ABNORMAL_CLOSE);
                }
                None => break Some(ABNORMAL_CLOSE),
            },
        }
    };

    unsent.extend(take_unsent(&mut outbound));
    if !unsent.is_empty() {
        debug!("Connection {} closed with {} frames unwritten", conn_id, unsent.len());
    }
    debug!("Connection {} closed with {:?}", conn_id, close_code);
    events.emit(SocketEvent::Closed { code: close_code, unsent });
}

/// Refuse further frames, then collect the text frames still waiting
fn take_unsent(outbound: &mut mpsc::UnboundedReceiver<Frame>) -> Vec<String> {
    outbound.close();
    let mut unsent = Vec::new();
    while let Ok(frame) = outbound.try_recv() {
        if let Frame::Text(text) = frame {
            unsent.push(text);
        }
    }
    unsent
}
