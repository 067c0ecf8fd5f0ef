//! Author → endorser: withdraw a request.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::Thread;
use crate::transaction::TransactionRecord;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CancelTransaction {
    #[serde(rename = "@id")]
    pub id: String,
    #[serde(rename = "~thread")]
    pub thread: Thread,
    pub transaction_id: String,
}

impl CancelTransaction {
    pub fn from_record(record: &TransactionRecord) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            thread: Thread::new(record.thread_id().to_string()),
            transaction_id: record.transaction_id().to_string(),
        }
    }
}
