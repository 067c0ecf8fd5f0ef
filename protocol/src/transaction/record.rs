//! The persisted transaction record.
//!
//! One record per (connection, thread) pair and per agent: the author and
//! the endorser each keep their own copy of the same exchange. The state
//! and the endorser's signatures are only changed through
//! [`apply`](TransactionRecord::apply) and the manager; everything else is
//! plain data. The identifying ids are fixed at construction, so the
//! store's thread index never disagrees with a record it has written.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use thiserror::Error;
use uuid::Uuid;

use super::state::{Operation, TransactionState};
use super::types::{
    AttachFormat, SignatureRequest, SignatureResponse, Timing, TransactionRole, TransactionType,
};
use crate::messages::AttachedMessage;

/// Names of the indexed tags, in the order [`TransactionRecord::tags`] emits them.
pub const TAG_NAMES: [&str; 4] = ["state", "thread_id", "connection_id", "transaction_type"];

/// Why [`TransactionRecord::apply`] refused an operation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransitionError {
    #[error("{operation} is not permitted from state {from}")]
    Precondition {
        operation: Operation,
        from: TransactionState,
    },

    #[error("{operation} requires role {required}, record is held as {actual}")]
    Role {
        operation: Operation,
        required: TransactionRole,
        actual: TransactionRole,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionRecord {
    transaction_id: String,
    state: TransactionState,
    pub role: TransactionRole,
    pub transaction_type: TransactionType,
    connection_id: String,
    thread_id: String,
    /// The counterpart's id for the same exchange, echoed in responses.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub their_transaction_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
    #[serde(default)]
    pub signature_request: Vec<SignatureRequest>,
    #[serde(default)]
    signature_response: Vec<SignatureResponse>,
    #[serde(default)]
    pub timing: Timing,
    #[serde(default)]
    pub formats: Vec<AttachFormat>,
    #[serde(default)]
    pub messages_attach: Vec<AttachedMessage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refusal_reason: Option<String>,
    /// Bumped by the store on every successful update.
    #[serde(default)]
    version: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TransactionRecord {
    /// A fresh record in `init`, not yet persisted.
    pub fn new(
        role: TransactionRole,
        connection_id: impl Into<String>,
        thread_id: impl Into<String>,
        transaction_type: TransactionType,
    ) -> Self {
        let now = Utc::now();
        Self {
            transaction_id: Uuid::new_v4().to_string(),
            state: TransactionState::Init,
            role,
            transaction_type,
            connection_id: connection_id.into(),
            thread_id: thread_id.into(),
            their_transaction_id: None,
            comment: None,
            signature_request: Vec::new(),
            signature_response: Vec::new(),
            timing: Timing::default(),
            formats: Vec::new(),
            messages_attach: Vec::new(),
            refusal_reason: None,
            version: 0,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn transaction_id(&self) -> &str {
        &self.transaction_id
    }

    pub fn connection_id(&self) -> &str {
        &self.connection_id
    }

    pub fn thread_id(&self) -> &str {
        &self.thread_id
    }

    pub fn state(&self) -> TransactionState {
        self.state
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn signature_response(&self) -> &[SignatureResponse] {
        &self.signature_response
    }

    /// The application payload of the first attachment, if any.
    pub fn payload(&self) -> Option<&Map<String, Value>> {
        self.messages_attach.first().map(|m| &m.data.json.payload)
    }

    /// Move the record along `operation`, checking the precondition and the
    /// role. Nothing is changed on error.
    pub fn apply(&mut self, operation: Operation) -> Result<TransactionState, TransitionError> {
        if operation.required_role() != self.role {
            return Err(TransitionError::Role {
                operation,
                required: operation.required_role(),
                actual: self.role,
            });
        }
        if !operation.permits(self.state) {
            return Err(TransitionError::Precondition {
                operation,
                from: self.state,
            });
        }
        let from = self.state;
        self.state = operation.target();
        self.updated_at = Utc::now();
        Ok(from)
    }

    pub(crate) fn set_signature_response(&mut self, signatures: Vec<SignatureResponse>) {
        self.signature_response = signatures;
    }

    pub(crate) fn set_version(&mut self, version: u64) {
        self.version = version;
    }

    /// Indexed tag values, keyed by the names in [`TAG_NAMES`].
    pub fn tags(&self) -> BTreeMap<&'static str, String> {
        let mut tags = BTreeMap::new();
        tags.insert("state", self.state.to_string());
        tags.insert("thread_id", self.thread_id.clone());
        tags.insert("connection_id", self.connection_id.clone());
        tags.insert("transaction_type", self.transaction_type.to_string());
        tags
    }
}
