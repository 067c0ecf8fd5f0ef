//! Gate between an endorsed transaction and the ledger write it authorizes.
//!
//! Writing is someone else's job. This module only decides whether a record
//! may be written and assembles what the writer needs: the operation and
//! the endorser's signatures.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::transaction::{SignatureResponse, TransactionRecord, TransactionState, TransactionType};

#[derive(Debug, Error)]
pub enum LedgerGateError {
    #[error("cannot write transaction {transaction_id} to ledger, as it is not endorsed (state {state})")]
    NotEndorsed {
        transaction_id: String,
        state: TransactionState,
    },

    #[error("transaction {0} carries no ledger operation")]
    MissingPayload(String),
}

/// Everything needed to submit an endorsed write.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EndorsedWrite {
    pub transaction_id: String,
    pub transaction_type: TransactionType,
    pub operation: Map<String, Value>,
    pub signatures: Vec<SignatureResponse>,
}

/// The write authorized by `record`, if it has been endorsed.
pub fn endorsed_write(record: &TransactionRecord) -> Result<EndorsedWrite, LedgerGateError> {
    if record.state() != TransactionState::Endorse {
        return Err(LedgerGateError::NotEndorsed {
            transaction_id: record.transaction_id().to_string(),
            state: record.state(),
        });
    }
    let operation = record
        .payload()
        .cloned()
        .ok_or_else(|| LedgerGateError::MissingPayload(record.transaction_id().to_string()))?;
    Ok(EndorsedWrite {
        transaction_id: record.transaction_id().to_string(),
        transaction_type: record.transaction_type,
        operation,
        signatures: record.signature_response().to_vec(),
    })
}
