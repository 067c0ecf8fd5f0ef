//! Endorser → author: the decision on a pending request.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::Thread;
use crate::transaction::{SignatureResponse, TransactionRecord};

/// The endorser signed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EndorsedTransactionResponse {
    #[serde(rename = "@id")]
    pub id: String,
    #[serde(rename = "~thread")]
    pub thread: Thread,
    /// The author's transaction id, echoed from the request.
    pub transaction_id: String,
    /// Identifier of the endorser's own record.
    pub endorser_transaction_id: String,
    pub signature_response: Vec<SignatureResponse>,
}

/// The endorser declined.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RefusedTransactionResponse {
    #[serde(rename = "@id")]
    pub id: String,
    #[serde(rename = "~thread")]
    pub thread: Thread,
    pub transaction_id: String,
    pub endorser_transaction_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// The author's id for the exchange, or ours if the request carried none.
fn author_transaction_id(record: &TransactionRecord) -> String {
    record
        .their_transaction_id
        .clone()
        .unwrap_or_else(|| record.transaction_id().to_string())
}

impl EndorsedTransactionResponse {
    pub fn from_record(record: &TransactionRecord) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            thread: Thread::new(record.thread_id().to_string()),
            transaction_id: author_transaction_id(record),
            endorser_transaction_id: record.transaction_id().to_string(),
            signature_response: record.signature_response().to_vec(),
        }
    }
}

impl RefusedTransactionResponse {
    pub fn from_record(record: &TransactionRecord) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            thread: Thread::new(record.thread_id().to_string()),
            transaction_id: author_transaction_id(record),
            endorser_transaction_id: record.transaction_id().to_string(),
            reason: record.refusal_reason.clone(),
        }
    }
}
