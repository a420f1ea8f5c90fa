use std::collections::VecDeque;
use tracing::{debug, error};

use crate::models::{encode, MessageClass, SendMessage};

/// Outcome of handing one envelope to the dispatcher
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dispatch {
    /// Write this text to the open connection now
    Send(String),
    Queued,
    Dropped,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct QueuedEnvelope {
    is_selection: bool,
    text: String,
}

/// Routes outbound envelopes by class.
///
/// Ephemeral envelopes only go out while the connection is open. Durable ones
/// are queued while it is not and drained, oldest first, on the next open.
#[derive(Debug, Default)]
pub struct OutboundDispatcher {
    queue: VecDeque<QueuedEnvelope>,
    compact_selections: bool,
}

impl OutboundDispatcher {
    pub fn new(compact_selections: bool) -> Self {
        Self { queue: VecDeque::new(), compact_selections }
    }

    pub fn dispatch(&mut self, msg: &SendMessage, is_open: bool) -> Dispatch {
        let text = match encode(msg) {
            Ok(text) => text,
            Err(e) => {
                error!("Failed to encode outbound {:?}: {}", msg, e);
                return Dispatch::Dropped;
            }
        };

        match (msg.class(), is_open) {
            (_, true) => Dispatch::Send(text),
            (MessageClass::Ephemeral, false) => Dispatch::Dropped,
            (MessageClass::Durable, false) => {
                let is_selection = matches!(msg, SendMessage::Selection { .. });
                if self.compact_selections && is_selection {
                    if let Some(last) = self.queue.back_mut().filter(|last| last.is_selection) {
                        debug!("Replacing queued selection with a newer one");
                        last.text = text;
                        return Dispatch::Queued;
                    }
                }
                self.queue.push_back(QueuedEnvelope { is_selection, text });
                Dispatch::Queued
            }
        }
    }

    /// Take every queued envelope in enqueue order
    pub fn drain(&mut self) -> Vec<String> {
        self.queue.drain(..).map(|e| e.text).collect()
    }

    /// Put back envelopes a flush could not deliver, ahead of anything queued since
    ///
    /// Requeued envelopes are never compacted away.
    pub fn requeue_front(&mut self, texts: Vec<String>) {
        for text in texts.into_iter().rev() {
            self.queue.push_front(QueuedEnvelope { is_selection: false, text });
        }
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}
