//! # Transaction State Machine
//!
//! ```text
//!            create_request / receive_request
//!   init ───────────────────────────────────────▶ request
//!                                                   │
//!        ┌───────────── endorse ───────────────────┤
//!        │  ┌────────── refuse ────────────────────┤
//!        │  │  ┌─────── cancel ────────────────────┤
//!        ▼  ▼  ▼                                    ▼
//!   endorse refuse cancel ◀──── cancel ───────── resend ◀─┐
//!           │      │                                │      │
//!           └──────┴─────────── resend ─────────────┴──────┘
//! ```
//!
//! `endorse` is final. `refuse` and `cancel` may still be re-sent, which
//! puts the transaction back in front of the endorser.
//!
//! Every operation is described by an [`Operation`]: the states it may start
//! from, the state it ends in, and the local role that may perform it.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::types::{ParseError, TransactionRole};

/// Lifecycle position of a transaction record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionState {
    /// Transient. Never persisted.
    Init,
    Request,
    Endorse,
    Refuse,
    Cancel,
    Resend,
}

impl TransactionState {
    pub const ALL: [TransactionState; 6] = [
        TransactionState::Init,
        TransactionState::Request,
        TransactionState::Endorse,
        TransactionState::Refuse,
        TransactionState::Cancel,
        TransactionState::Resend,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionState::Init => "init",
            TransactionState::Request => "request",
            TransactionState::Endorse => "endorse",
            TransactionState::Refuse => "refuse",
            TransactionState::Cancel => "cancel",
            TransactionState::Resend => "resend",
        }
    }

    /// Awaiting the endorser's decision.
    pub fn is_pending(&self) -> bool {
        matches!(self, TransactionState::Request | TransactionState::Resend)
    }

    /// No operation leaves this state.
    pub fn is_final(&self) -> bool {
        Operation::ALL.iter().all(|op| !op.permits(*self))
    }

    /// States reachable from `self` through any sequence of operations,
    /// `self` excluded unless a cycle leads back to it.
    pub fn reachable(&self) -> Vec<TransactionState> {
        let mut seen: Vec<TransactionState> = Vec::new();
        let mut frontier = vec![*self];
        while let Some(state) = frontier.pop() {
            for op in Operation::ALL {
                if op.permits(state) {
                    let next = op.target();
                    if !seen.contains(&next) {
                        seen.push(next);
                        frontier.push(next);
                    }
                }
            }
        }
        seen
    }
}

impl fmt::Display for TransactionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransactionState {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|st| st.as_str() == s)
            .ok_or_else(|| ParseError {
                what: "transaction state",
                value: s.to_string(),
            })
    }
}

// ---------------------------------------------------------------------------
// Operations
// ---------------------------------------------------------------------------

/// A state-changing operation on a transaction record, local or inbound.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    CreateRequest,
    Endorse,
    Refuse,
    Cancel,
    Resend,
    ReceiveRequest,
    ReceiveEndorse,
    ReceiveRefuse,
    ReceiveCancel,
    ReceiveResend,
}

impl Operation {
    pub const ALL: [Operation; 10] = [
        Operation::CreateRequest,
        Operation::Endorse,
        Operation::Refuse,
        Operation::Cancel,
        Operation::Resend,
        Operation::ReceiveRequest,
        Operation::ReceiveEndorse,
        Operation::ReceiveRefuse,
        Operation::ReceiveCancel,
        Operation::ReceiveResend,
    ];

    /// Whether the operation may start from `from`.
    pub fn permits(&self, from: TransactionState) -> bool {
        use TransactionState::*;
        match self {
            Operation::CreateRequest | Operation::ReceiveRequest => from == Init,
            Operation::Endorse
            | Operation::Refuse
            | Operation::ReceiveEndorse
            | Operation::ReceiveRefuse => from.is_pending(),
            Operation::Cancel | Operation::ReceiveCancel => {
                matches!(from, Request | Resend | Cancel)
            }
            Operation::Resend | Operation::ReceiveResend => {
                matches!(from, Request | Resend | Refuse | Cancel)
            }
        }
    }

    /// State the record is in after the operation.
    pub fn target(&self) -> TransactionState {
        match self {
            Operation::CreateRequest | Operation::ReceiveRequest => TransactionState::Request,
            Operation::Endorse | Operation::ReceiveEndorse => TransactionState::Endorse,
            Operation::Refuse | Operation::ReceiveRefuse => TransactionState::Refuse,
            Operation::Cancel | Operation::ReceiveCancel => TransactionState::Cancel,
            Operation::Resend | Operation::ReceiveResend => TransactionState::Resend,
        }
    }

    /// Local role a record must hold for the operation to apply.
    pub fn required_role(&self) -> TransactionRole {
        match self {
            Operation::CreateRequest
            | Operation::Cancel
            | Operation::Resend
            | Operation::ReceiveEndorse
            | Operation::ReceiveRefuse => TransactionRole::Author,
            Operation::ReceiveRequest
            | Operation::Endorse
            | Operation::Refuse
            | Operation::ReceiveCancel
            | Operation::ReceiveResend => TransactionRole::Endorser,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Operation::CreateRequest => "create_request",
            Operation::Endorse => "create_endorse_response",
            Operation::Refuse => "create_refuse_response",
            Operation::Cancel => "cancel_transaction",
            Operation::Resend => "transaction_resend",
            Operation::ReceiveRequest => "receive_request",
            Operation::ReceiveEndorse => "receive_endorse_response",
            Operation::ReceiveRefuse => "receive_refuse_response",
            Operation::ReceiveCancel => "receive_cancel_transaction",
            Operation::ReceiveResend => "receive_transaction_resend",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
