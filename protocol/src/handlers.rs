//! # Inbound Message Handling
//!
//! Routes each inbound protocol message to the manager operation for its
//! `@type`. Failures are terminal for the offending message only: they are
//! logged, published as a [`ProtocolEvent::MessageDropped`], and never
//! answered or retried. Other in-flight messages are unaffected.

use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::events::{self, ProtocolEvent};
use crate::manager::{ErrorKind, ManagerError, TransactionManager};
use crate::messages::ProtocolMessage;
use crate::transaction::TransactionRecord;

/// A decoded message and the connection it arrived on.
#[derive(Debug, Clone)]
pub struct InboundMessage {
    pub connection_id: String,
    pub message: ProtocolMessage,
}

impl InboundMessage {
    pub fn new(connection_id: impl Into<String>, message: ProtocolMessage) -> Self {
        Self {
            connection_id: connection_id.into(),
            message,
        }
    }
}

/// What became of one inbound message.
#[derive(Debug, Clone)]
pub enum HandleOutcome {
    /// The record as stored after the message was applied.
    Applied(TransactionRecord),
    Dropped { kind: ErrorKind, reason: String },
}

impl HandleOutcome {
    pub fn is_applied(&self) -> bool {
        matches!(self, HandleOutcome::Applied(_))
    }
}

pub struct InboundHandler {
    manager: Arc<TransactionManager>,
}

impl InboundHandler {
    pub fn new(manager: Arc<TransactionManager>) -> Self {
        Self { manager }
    }

    pub fn manager(&self) -> &Arc<TransactionManager> {
        &self.manager
    }

    /// Apply one message. Never fails; see [`HandleOutcome`].
    pub async fn handle(&self, inbound: InboundMessage) -> HandleOutcome {
        let InboundMessage {
            connection_id,
            message,
        } = inbound;
        debug!(
            %connection_id,
            message_type = message.short_name(),
            thread_id = message.thread_id(),
            "inbound message"
        );

        let mgr = &self.manager;
        let result = match &message {
            ProtocolMessage::Request(m) => mgr.receive_request(m, &connection_id).await,
            ProtocolMessage::Resend(m) => mgr.receive_transaction_resend(m, &connection_id).await,
            ProtocolMessage::Endorsed(m) => mgr.receive_endorse_response(m, &connection_id).await,
            ProtocolMessage::Refused(m) => mgr.receive_refuse_response(m, &connection_id).await,
            ProtocolMessage::Cancel(m) => mgr.receive_cancel_transaction(m, &connection_id).await,
        };

        match result {
            Ok(record) => HandleOutcome::Applied(record),
            Err(err) => self.drop_message(&connection_id, &message, err),
        }
    }

    /// Decode `body` and apply it. Undecodable input is dropped before it
    /// reaches the state machine.
    pub async fn handle_raw(&self, connection_id: &str, body: &[u8]) -> HandleOutcome {
        match ProtocolMessage::from_json(body) {
            Ok(message) => self.handle(InboundMessage::new(connection_id, message)).await,
            Err(err) => {
                warn!(connection_id, error = %err, "dropping malformed message");
                events::publish(
                    &self.manager.context().events,
                    ProtocolEvent::MalformedMessage {
                        connection_id: connection_id.to_string(),
                        error: err.to_string(),
                    },
                );
                HandleOutcome::Dropped {
                    kind: ErrorKind::Malformed,
                    reason: err.to_string(),
                }
            }
        }
    }

    /// Handle `inbound` on its own task.
    pub fn spawn(self: &Arc<Self>, inbound: InboundMessage) -> JoinHandle<HandleOutcome> {
        let this = Arc::clone(self);
        tokio::spawn(async move { this.handle(inbound).await })
    }

    fn drop_message(
        &self,
        connection_id: &str,
        message: &ProtocolMessage,
        err: ManagerError,
    ) -> HandleOutcome {
        let kind = err.kind();
        warn!(
            connection_id,
            message_type = message.short_name(),
            thread_id = message.thread_id(),
            kind = kind.as_str(),
            error = %err,
            "dropping inbound message"
        );
        events::publish(
            &self.manager.context().events,
            ProtocolEvent::MessageDropped {
                connection_id: connection_id.to_string(),
                thread_id: message.thread_id().to_string(),
                message_type: message.message_type().to_string(),
                kind: kind.as_str().to_string(),
                reason: err.to_string(),
            },
        );
        HandleOutcome::Dropped {
            kind,
            reason: err.to_string(),
        }
    }
}
