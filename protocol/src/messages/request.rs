//! Author → endorser: the initial request and its re-delivery.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{AttachedMessage, Thread};
use crate::transaction::{SignatureRequest, Timing, TransactionRecord, TransactionType};

/// Asks the endorser to sign the attached ledger operation.
///
/// The request's `@id` is the thread id of the whole exchange.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionRequest {
    #[serde(rename = "@id")]
    pub id: String,
    #[serde(rename = "~thread")]
    pub thread: Thread,
    /// The author's transaction id.
    pub transaction_id: String,
    pub signature_request: Vec<SignatureRequest>,
    pub timing: Timing,
    pub transaction_type: TransactionType,
    pub messages_attach: Vec<AttachedMessage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
}

/// A re-delivered request. Same shape, different `@type`.
pub type ResendTransactionRequest = TransactionRequest;

impl TransactionRequest {
    /// First request for `record`. Its `@id` equals the record's thread id.
    pub fn from_record(record: &TransactionRecord) -> Self {
        Self::with_id(record, record.thread_id().to_string())
    }

    /// Re-delivery of `record` on the same thread, under a fresh `@id`.
    /// The attachments are sent exactly as first requested.
    pub fn resend(record: &TransactionRecord) -> ResendTransactionRequest {
        Self::with_id(record, Uuid::new_v4().to_string())
    }

    fn with_id(record: &TransactionRecord, id: String) -> Self {
        Self {
            id,
            thread: Thread::new(record.thread_id().to_string()),
            transaction_id: record.transaction_id().to_string(),
            signature_request: record.signature_request.clone(),
            timing: record.timing.clone(),
            transaction_type: record.transaction_type,
            messages_attach: record.messages_attach.clone(),
            comment: record.comment.clone(),
        }
    }
}
