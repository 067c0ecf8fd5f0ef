//! Error types for the transaction manager.
//!
//! Every failure is classified by [`ErrorKind`] so callers can map it to a
//! response (HTTP status, drop reason, metric label) without matching on
//! every variant.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::messages::MessageError;
use crate::outbound::TransportError;
use crate::storage::StoreError;
use crate::transaction::{Operation, TransactionRole, TransactionState, TransitionError};

/// Coarse classification of a [`ManagerError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// The operation is not allowed from the record's current state.
    Precondition,
    /// The referenced record or connection does not exist.
    NotFound,
    /// The counterpart sent something the protocol does not allow.
    ProtocolViolation,
    /// Input could not be decoded.
    Malformed,
    /// Storage, transport, or serialization trouble on our side.
    Internal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Precondition => "precondition",
            ErrorKind::NotFound => "not_found",
            ErrorKind::ProtocolViolation => "protocol_violation",
            ErrorKind::Malformed => "malformed",
            ErrorKind::Internal => "internal",
        }
    }
}

#[derive(Debug, Error)]
pub enum ManagerError {
    #[error("cannot {operation} transaction {transaction_id} in state {state}")]
    PreconditionFailed {
        transaction_id: String,
        state: TransactionState,
        operation: Operation,
    },

    #[error("{operation} requires the {required} role, local role is {actual}")]
    RoleMismatch {
        operation: Operation,
        required: TransactionRole,
        actual: TransactionRole,
    },

    #[error("transaction not found: {0}")]
    TransactionNotFound(String),

    #[error("connection not found: {0}")]
    ConnectionNotFound(String),

    #[error("no transaction for thread {thread_id} on connection {connection_id}")]
    UnknownThread {
        connection_id: String,
        thread_id: String,
    },

    #[error("thread {thread_id} on connection {connection_id} already belongs to transaction {existing}")]
    DuplicateThread {
        connection_id: String,
        thread_id: String,
        existing: String,
    },

    #[error("endorsement signature rejected: {0}")]
    InvalidSignature(String),

    #[error("transaction {0} kept changing under concurrent writers")]
    Conflict(String),

    #[error(transparent)]
    Malformed(#[from] MessageError),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("store error: {0}")]
    Store(StoreError),

    #[error(transparent)]
    Transport(#[from] TransportError),
}

pub type ManagerResult<T> = Result<T, ManagerError>;

impl ManagerError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ManagerError::PreconditionFailed { .. } | ManagerError::RoleMismatch { .. } => {
                ErrorKind::Precondition
            }
            ManagerError::TransactionNotFound(_) | ManagerError::ConnectionNotFound(_) => {
                ErrorKind::NotFound
            }
            ManagerError::UnknownThread { .. }
            | ManagerError::DuplicateThread { .. }
            | ManagerError::InvalidSignature(_) => ErrorKind::ProtocolViolation,
            ManagerError::Malformed(_) => ErrorKind::Malformed,
            ManagerError::Conflict(_)
            | ManagerError::Serialization(_)
            | ManagerError::Store(_)
            | ManagerError::Transport(_) => ErrorKind::Internal,
        }
    }

    pub(crate) fn from_transition(transaction_id: &str, err: TransitionError) -> Self {
        match err {
            TransitionError::Precondition { operation, from } => ManagerError::PreconditionFailed {
                transaction_id: transaction_id.to_string(),
                state: from,
                operation,
            },
            TransitionError::Role {
                operation,
                required,
                actual,
            } => ManagerError::RoleMismatch {
                operation,
                required,
                actual,
            },
        }
    }
}

impl From<StoreError> for ManagerError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(id) => ManagerError::TransactionNotFound(id),
            StoreError::DuplicateThread {
                connection_id,
                thread_id,
                existing,
            } => ManagerError::DuplicateThread {
                connection_id,
                thread_id,
                existing,
            },
            other => ManagerError::Store(other),
        }
    }
}
