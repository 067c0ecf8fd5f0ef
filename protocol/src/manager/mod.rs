//! # Transaction Manager
//!
//! Drives the endorsement state machine for one local agent. Every
//! operation follows the same shape:
//!
//! 1. Load the record (or build a new one).
//! 2. Check the operation's state and role preconditions.
//! 3. Mutate the record.
//! 4. Persist it with a compare-and-set on its version.
//! 5. Return the updated record plus, for local operations, exactly one
//!    outbound message addressed to the counterpart.
//!
//! A failed precondition changes nothing. A lost compare-and-set reloads
//! the record and checks again, so the loser of a race on one transaction
//! observes [`ManagerError::PreconditionFailed`] rather than overwriting
//! the winner.
//!
//! Local operations do not dispatch their message; the caller hands it to
//! [`TransactionManager::dispatch`] once it is satisfied with the result.

mod context;
mod correlation;
mod error;

pub use context::{LocalIdentity, ManagerContext};
pub use correlation::{cache_key, Correlator};
pub use error::{ErrorKind, ManagerError, ManagerResult};

use chrono::Utc;
use serde_json::{Map, Value};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::connection::ConnectionRecord;
use crate::crypto::{payload_digest, Verkey};
use crate::events::{self, EventReceiver, ProtocolEvent};
use crate::messages::{
    AttachedMessage, CancelTransaction, EndorsedTransactionResponse, ProtocolMessage,
    RefusedTransactionResponse, TransactionRequest,
};
use crate::outbound::OutboundMessage;
use crate::storage::{StoreError, TagFilter};
use crate::transaction::{
    AttachFormat, Operation, SignatureRequest, SignatureResponse, Timing, TransactionRecord,
    TransactionRole, TransactionState, TransactionType,
};

// ---------------------------------------------------------------------------
// Request Parameters
// ---------------------------------------------------------------------------

/// Input of [`TransactionManager::create_request`].
#[derive(Debug, Clone)]
pub struct NewRequest {
    pub connection_id: String,
    pub transaction_type: TransactionType,
    /// The ledger operation to be endorsed. Stored and forwarded verbatim.
    pub payload: Map<String, Value>,
    pub comment: Option<String>,
    /// Overrides the configured default expiry.
    pub expires_time: Option<chrono::DateTime<Utc>>,
}

impl NewRequest {
    pub fn new(
        connection_id: impl Into<String>,
        transaction_type: TransactionType,
        payload: Map<String, Value>,
    ) -> Self {
        Self {
            connection_id: connection_id.into(),
            transaction_type,
            payload,
            comment: None,
            expires_time: None,
        }
    }

    pub fn with_comment(mut self, comment: impl Into<String>) -> Self {
        self.comment = Some(comment.into());
        self
    }

    pub fn expiring_at(mut self, expires_time: chrono::DateTime<Utc>) -> Self {
        self.expires_time = Some(expires_time);
        self
    }
}

/// Result of a local operation: the stored record and the message to send.
pub type Transition = (TransactionRecord, OutboundMessage);

// ---------------------------------------------------------------------------
// Manager
// ---------------------------------------------------------------------------

pub struct TransactionManager {
    ctx: ManagerContext,
    correlator: Correlator,
}

impl TransactionManager {
    pub fn new(ctx: ManagerContext) -> Self {
        let correlator = Correlator::new(ctx.store.clone(), ctx.cache.clone(), ctx.config.cache_ttl);
        Self { ctx, correlator }
    }

    pub fn context(&self) -> &ManagerContext {
        &self.ctx
    }

    pub fn subscribe(&self) -> EventReceiver {
        self.ctx.subscribe()
    }

    /// Verkey the local agent endorses with.
    pub fn verkey(&self) -> Verkey {
        self.ctx.identity.keypair.verkey()
    }

    // -- Queries ------------------------------------------------------------

    pub async fn retrieve(&self, transaction_id: &str) -> ManagerResult<TransactionRecord> {
        Ok(self.ctx.store.retrieve_by_id(transaction_id).await?)
    }

    pub async fn list(&self, filter: &TagFilter) -> ManagerResult<Vec<TransactionRecord>> {
        Ok(self.ctx.store.find_by_tags(filter).await?)
    }

    /// The record bound to `(connection_id, thread_id)`, if any.
    pub async fn resolve(
        &self,
        connection_id: &str,
        thread_id: &str,
    ) -> ManagerResult<Option<TransactionRecord>> {
        Ok(self.correlator.resolve(connection_id, thread_id).await?)
    }

    // -- Author side --------------------------------------------------------

    /// Open a new exchange on `request.connection_id`.
    ///
    /// The local agent must be the author on that connection. The new
    /// record gets a fresh thread id, which is also the `@id` of the
    /// emitted request.
    pub async fn create_request(&self, request: NewRequest) -> ManagerResult<Transition> {
        let connection = self
            .connection_as(&request.connection_id, Operation::CreateRequest)
            .await?;

        let thread_id = Uuid::new_v4().to_string();
        let mut record = TransactionRecord::new(
            TransactionRole::Author,
            &connection.connection_id,
            thread_id,
            request.transaction_type,
        );
        record.comment = request.comment;
        record.timing = Timing::expiring_at(request.expires_time.unwrap_or_else(|| {
            Utc::now()
                + chrono::Duration::from_std(self.ctx.config.default_expiry)
                    .unwrap_or_else(|_| chrono::Duration::hours(24))
        }));
        record.signature_request = vec![SignatureRequest::default()];
        record.messages_attach =
            vec![AttachedMessage::new(request.payload).with_roles(TransactionRole::Author)];
        record.formats = vec![AttachFormat::endorse_request(0)];

        let from = record
            .apply(Operation::CreateRequest)
            .map_err(|e| ManagerError::from_transition(record.transaction_id(), e))?;
        let record = self.persist_new(record, Operation::CreateRequest, from).await?;

        let message = ProtocolMessage::Request(TransactionRequest::from_record(&record));
        Ok(self.outbound(record, message))
    }

    /// Withdraw a request that has not been decided.
    pub async fn cancel_transaction(&self, transaction_id: &str) -> ManagerResult<Transition> {
        let record = self
            .transition(transaction_id, Operation::Cancel, |_| Ok(()))
            .await?;
        let message = ProtocolMessage::Cancel(CancelTransaction::from_record(&record));
        Ok(self.outbound(record, message))
    }

    /// Re-deliver the original request, attachments unchanged.
    ///
    /// Permitted from every state but `endorse`, including after a refusal
    /// or a cancellation.
    pub async fn transaction_resend(&self, transaction_id: &str) -> ManagerResult<Transition> {
        let record = self
            .transition(transaction_id, Operation::Resend, |record| {
                record.refusal_reason = None;
                Ok(())
            })
            .await?;
        let message = ProtocolMessage::Resend(TransactionRequest::resend(&record));
        Ok(self.outbound(record, message))
    }

    /// Apply the endorser's approval.
    ///
    /// Every signature must verify against the digest of our own copy of
    /// the attachments before anything is written.
    pub async fn receive_endorse_response(
        &self,
        response: &EndorsedTransactionResponse,
        connection_id: &str,
    ) -> ManagerResult<TransactionRecord> {
        let record = self
            .correlated(connection_id, &response.thread.thid)
            .await?;

        if response.signature_response.is_empty() {
            return Err(ManagerError::InvalidSignature(
                "endorsement carries no signature".into(),
            ));
        }
        let digest = payload_digest(&record.messages_attach)
            .map_err(|e| ManagerError::Serialization(e.to_string()))?;
        for sig in &response.signature_response {
            let valid = sig
                .signer_verkey
                .verify(&digest, &sig.signature)
                .map_err(|e| ManagerError::InvalidSignature(e.to_string()))?;
            if !valid {
                return Err(ManagerError::InvalidSignature(format!(
                    "signature by {} does not cover transaction {}",
                    sig.signer_verkey, record.transaction_id()
                )));
            }
        }

        let signatures = response.signature_response.clone();
        self.transition(record.transaction_id(), Operation::ReceiveEndorse, |record| {
            record.set_signature_response(signatures.clone());
            Ok(())
        })
        .await
    }

    /// Apply the endorser's refusal.
    pub async fn receive_refuse_response(
        &self,
        response: &RefusedTransactionResponse,
        connection_id: &str,
    ) -> ManagerResult<TransactionRecord> {
        let record = self
            .correlated(connection_id, &response.thread.thid)
            .await?;
        let reason = response.reason.clone();
        self.transition(record.transaction_id(), Operation::ReceiveRefuse, |record| {
            record.refusal_reason = reason.clone();
            Ok(())
        })
        .await
    }

    // -- Endorser side ------------------------------------------------------

    /// Record an inbound request.
    ///
    /// A request whose `(connection_id, thread_id)` pair is already bound
    /// returns the existing record untouched.
    pub async fn receive_request(
        &self,
        request: &TransactionRequest,
        connection_id: &str,
    ) -> ManagerResult<TransactionRecord> {
        self.connection_as(connection_id, Operation::ReceiveRequest)
            .await?;

        if let Some(existing) = self.resolve(connection_id, &request.thread.thid).await? {
            debug!(
                transaction_id = %existing.transaction_id(),
                thread_id = %request.thread.thid,
                "request already recorded"
            );
            return Ok(existing);
        }

        let mut record = Self::endorser_record(request, connection_id);
        let from = record
            .apply(Operation::ReceiveRequest)
            .map_err(|e| ManagerError::from_transition(record.transaction_id(), e))?;
        self.persist_or_existing(record, Operation::ReceiveRequest, from)
            .await
    }

    /// Record a re-delivered request.
    ///
    /// If the original request never arrived the record is created here,
    /// passing through `request` on the way to `resend`.
    pub async fn receive_transaction_resend(
        &self,
        request: &TransactionRequest,
        connection_id: &str,
    ) -> ManagerResult<TransactionRecord> {
        self.connection_as(connection_id, Operation::ReceiveResend)
            .await?;

        if let Some(existing) = self.resolve(connection_id, &request.thread.thid).await? {
            let attachments = request.messages_attach.clone();
            return self
                .transition(existing.transaction_id(), Operation::ReceiveResend, |record| {
                    if record.messages_attach.is_empty() {
                        record.messages_attach = attachments.clone();
                    }
                    Ok(())
                })
                .await;
        }

        let mut record = Self::endorser_record(request, connection_id);
        let from = record.state();
        record
            .apply(Operation::ReceiveRequest)
            .and_then(|_| record.apply(Operation::ReceiveResend))
            .map_err(|e| ManagerError::from_transition(record.transaction_id(), e))?;
        self.persist_or_existing(record, Operation::ReceiveResend, from)
            .await
    }

    /// Apply the author's withdrawal.
    pub async fn receive_cancel_transaction(
        &self,
        cancel: &CancelTransaction,
        connection_id: &str,
    ) -> ManagerResult<TransactionRecord> {
        let record = self.correlated(connection_id, &cancel.thread.thid).await?;
        self.transition(record.transaction_id(), Operation::ReceiveCancel, |_| Ok(()))
            .await
    }

    /// Approve a pending request: sign the attachments and answer.
    pub async fn create_endorse_response(&self, transaction_id: &str) -> ManagerResult<Transition> {
        let keypair = &self.ctx.identity.keypair;
        let record = self
            .transition(transaction_id, Operation::Endorse, |record| {
                let digest = payload_digest(&record.messages_attach)
                    .map_err(|e| ManagerError::Serialization(e.to_string()))?;
                let requested = record
                    .signature_request
                    .first()
                    .cloned()
                    .unwrap_or_default();
                let response = SignatureResponse::answering(
                    &requested,
                    record.thread_id().to_string(),
                    keypair.verkey(),
                    keypair.sign(&digest),
                );
                record.set_signature_response(vec![response]);
                Ok(())
            })
            .await?;
        let message = ProtocolMessage::Endorsed(EndorsedTransactionResponse::from_record(&record));
        Ok(self.outbound(record, message))
    }

    /// Decline a pending request.
    pub async fn create_refuse_response(
        &self,
        transaction_id: &str,
        reason: Option<String>,
    ) -> ManagerResult<Transition> {
        let record = self
            .transition(transaction_id, Operation::Refuse, |record| {
                record.refusal_reason = reason.clone();
                Ok(())
            })
            .await?;
        let message = ProtocolMessage::Refused(RefusedTransactionResponse::from_record(&record));
        Ok(self.outbound(record, message))
    }

    // -- Dispatch -----------------------------------------------------------

    /// Hand `outbound` to the transport. Does not wait for delivery.
    pub async fn dispatch(&self, outbound: &OutboundMessage) -> ManagerResult<()> {
        self.ctx
            .transport
            .send(outbound.message.clone(), &outbound.connection_id)
            .await?;
        debug!(
            connection_id = %outbound.connection_id,
            message_type = outbound.message.short_name(),
            "outbound message queued"
        );
        events::publish(
            &self.ctx.events,
            ProtocolEvent::OutboundQueued {
                connection_id: outbound.connection_id.clone(),
                thread_id: outbound.message.thread_id().to_string(),
                message_type: outbound.message.message_type().to_string(),
            },
        );
        Ok(())
    }

    // -- Internals ----------------------------------------------------------

    /// Resolve `connection_id` and check we play the role `operation` needs.
    async fn connection_as(
        &self,
        connection_id: &str,
        operation: Operation,
    ) -> ManagerResult<ConnectionRecord> {
        let connection = self
            .ctx
            .connections
            .resolve(connection_id)
            .await
            .ok_or_else(|| ManagerError::ConnectionNotFound(connection_id.to_string()))?;
        if connection.my_role != operation.required_role() {
            return Err(ManagerError::RoleMismatch {
                operation,
                required: operation.required_role(),
                actual: connection.my_role,
            });
        }
        Ok(connection)
    }

    /// The record bound to the pair, or a protocol violation.
    async fn correlated(
        &self,
        connection_id: &str,
        thread_id: &str,
    ) -> ManagerResult<TransactionRecord> {
        self.resolve(connection_id, thread_id)
            .await?
            .ok_or_else(|| ManagerError::UnknownThread {
                connection_id: connection_id.to_string(),
                thread_id: thread_id.to_string(),
            })
    }

    fn endorser_record(request: &TransactionRequest, connection_id: &str) -> TransactionRecord {
        let mut record = TransactionRecord::new(
            TransactionRole::Endorser,
            connection_id,
            request.thread.thid.clone(),
            request.transaction_type,
        );
        record.their_transaction_id = Some(request.transaction_id.clone());
        record.comment = request.comment.clone();
        record.signature_request = request.signature_request.clone();
        record.timing = request.timing.clone();
        record.messages_attach = request.messages_attach.clone();
        record.formats = (0..request.messages_attach.len())
            .map(AttachFormat::endorse_request)
            .collect();
        record
    }

    async fn persist_new(
        &self,
        record: TransactionRecord,
        operation: Operation,
        from: TransactionState,
    ) -> ManagerResult<TransactionRecord> {
        self.ctx.store.create(&record).await?;
        self.correlator.remember(&record).await;
        self.announce(&record, operation, from);
        Ok(record)
    }

    /// Like `persist_new`, but a concurrent delivery that bound the pair
    /// first wins and its record is returned.
    async fn persist_or_existing(
        &self,
        record: TransactionRecord,
        operation: Operation,
        from: TransactionState,
    ) -> ManagerResult<TransactionRecord> {
        match self.persist_new(record, operation, from).await {
            Err(ManagerError::DuplicateThread { existing, .. }) => {
                debug!(transaction_id = %existing, "concurrent delivery already recorded");
                self.retrieve(&existing).await
            }
            other => other,
        }
    }

    /// Load, check, mutate and compare-and-set, retrying on lost races.
    async fn transition<F>(
        &self,
        transaction_id: &str,
        operation: Operation,
        mutate: F,
    ) -> ManagerResult<TransactionRecord>
    where
        F: Fn(&mut TransactionRecord) -> ManagerResult<()> + Send + Sync,
    {
        let mut attempt = 0;
        loop {
            let mut record = self.ctx.store.retrieve_by_id(transaction_id).await?;
            let from = record
                .apply(operation)
                .map_err(|e| ManagerError::from_transition(transaction_id, e))?;
            mutate(&mut record)?;

            match self.ctx.store.update(&record).await {
                Ok(saved) => {
                    self.announce(&saved, operation, from);
                    return Ok(saved);
                }
                Err(StoreError::Conflict { .. }) if attempt < self.ctx.config.max_transition_retries => {
                    attempt += 1;
                    debug!(transaction_id, %operation, attempt, "lost update race, reloading");
                }
                Err(StoreError::Conflict { .. }) => {
                    warn!(transaction_id, %operation, "giving up after repeated update conflicts");
                    return Err(ManagerError::Conflict(transaction_id.to_string()));
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    fn outbound(&self, record: TransactionRecord, message: ProtocolMessage) -> Transition {
        let outbound = OutboundMessage::new(record.connection_id().to_string(), message);
        (record, outbound)
    }

    fn announce(&self, record: &TransactionRecord, operation: Operation, from: TransactionState) {
        info!(
            transaction_id = %record.transaction_id(),
            thread_id = %record.thread_id(),
            role = %record.role,
            %operation,
            from = %from,
            to = %record.state(),
            "transition applied"
        );
        events::publish(
            &self.ctx.events,
            ProtocolEvent::TransitionApplied {
                transaction_id: record.transaction_id().to_string(),
                connection_id: record.connection_id().to_string(),
                thread_id: record.thread_id().to_string(),
                role: record.role,
                operation: operation.name().to_string(),
                from,
                to: record.state(),
            },
        );
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
