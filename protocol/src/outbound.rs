//! # Outbound Transport
//!
//! Local transitions produce an [`OutboundMessage`]; a transport delivers
//! it to the counterpart. Delivery is fire-and-forget: a successful `send`
//! means the message was accepted for delivery, nothing more.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;

use crate::messages::ProtocolMessage;

/// A protocol message addressed to a connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboundMessage {
    pub connection_id: String,
    pub message: ProtocolMessage,
}

impl OutboundMessage {
    pub fn new(connection_id: impl Into<String>, message: ProtocolMessage) -> Self {
        Self {
            connection_id: connection_id.into(),
            message,
        }
    }
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("outbound queue is closed")]
    QueueClosed,
}

#[async_trait]
pub trait OutboundTransport: Send + Sync {
    async fn send(&self, message: ProtocolMessage, connection_id: &str) -> Result<(), TransportError>;
}

// ---------------------------------------------------------------------------
// Queued Transport
// ---------------------------------------------------------------------------

/// Hands messages to an unbounded channel drained by a delivery task.
#[derive(Debug, Clone)]
pub struct QueuedTransport {
    tx: mpsc::UnboundedSender<OutboundMessage>,
}

impl QueuedTransport {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<OutboundMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

#[async_trait]
impl OutboundTransport for QueuedTransport {
    async fn send(&self, message: ProtocolMessage, connection_id: &str) -> Result<(), TransportError> {
        self.tx
            .send(OutboundMessage::new(connection_id, message))
            .map_err(|_| TransportError::QueueClosed)
    }
}

// ---------------------------------------------------------------------------
// Recording Transport
// ---------------------------------------------------------------------------

/// Keeps every sent message in memory. For tests and dry runs.
#[derive(Debug, Default)]
pub struct RecordingTransport {
    sent: Mutex<Vec<OutboundMessage>>,
}

impl RecordingTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> Vec<OutboundMessage> {
        self.sent.lock().clone()
    }

    /// Drain and return everything sent so far.
    pub fn take(&self) -> Vec<OutboundMessage> {
        std::mem::take(&mut *self.sent.lock())
    }
}

#[async_trait]
impl OutboundTransport for RecordingTransport {
    async fn send(&self, message: ProtocolMessage, connection_id: &str) -> Result<(), TransportError> {
        self.sent.lock().push(OutboundMessage::new(connection_id, message));
        Ok(())
    }
}
