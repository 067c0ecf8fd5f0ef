//! Protocol events published by the manager and the inbound handler.
//!
//! Subscribers (metrics, WebSocket streams, tests) receive every event via a
//! `tokio::sync::broadcast` channel. Publishing never blocks and never fails
//! the operation that produced the event.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::config;
use crate::transaction::{TransactionRole, TransactionState};

pub type EventSender = broadcast::Sender<ProtocolEvent>;
pub type EventReceiver = broadcast::Receiver<ProtocolEvent>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ProtocolEvent {
    /// A record moved to a new state and was persisted.
    #[serde(rename = "transition_applied")]
    TransitionApplied {
        transaction_id: String,
        connection_id: String,
        thread_id: String,
        role: TransactionRole,
        operation: String,
        from: TransactionState,
        to: TransactionState,
    },
    /// An inbound message was rejected and discarded.
    #[serde(rename = "message_dropped")]
    MessageDropped {
        connection_id: String,
        thread_id: String,
        message_type: String,
        /// `ErrorKind` label of the failure.
        kind: String,
        reason: String,
    },
    /// Inbound bytes that did not decode as a protocol message.
    #[serde(rename = "malformed_message")]
    MalformedMessage { connection_id: String, error: String },
    /// A message was handed to the outbound transport.
    #[serde(rename = "outbound_queued")]
    OutboundQueued {
        connection_id: String,
        thread_id: String,
        message_type: String,
    },
}

/// A fresh event channel with the default capacity.
pub fn channel() -> (EventSender, EventReceiver) {
    broadcast::channel(config::EVENT_CHANNEL_CAPACITY)
}

/// Publish `event`, ignoring the absence of subscribers.
pub(crate) fn publish(events: &EventSender, event: ProtocolEvent) {
    let _ = events.send(event);
}
