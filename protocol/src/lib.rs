// Copyright (c) 2026 ALAS Technology. MIT License.
// See LICENSE for details.

//! # Endorse Protocol — Core Library
//!
//! Two-party transaction endorsement: an author asks an endorser to approve
//! a pending ledger write, and both sides track the exchange in a persisted
//! record until the endorser signs, refuses, or the author withdraws.
//!
//! ## Architecture
//!
//! - **config** — Message type URIs, envelope defaults, manager tunables.
//! - **crypto** — Ed25519 agent keys and canonical payload digests.
//! - **transaction** — Records, roles, and the state machine.
//! - **messages** — Wire messages and the attached-message envelope.
//! - **storage** — sled-backed record store and the correlation cache.
//! - **connection** — Known connections and our role on each.
//! - **outbound** — Transports that carry messages to the counterpart.
//! - **manager** — Transition logic, correlation, and errors.
//! - **handlers** — Inbound dispatch with drop-and-report on failure.
//! - **events** — Broadcast notifications for metrics and subscribers.
//! - **ledger** — Gate that releases only endorsed writes.
//!
//! ## Flow
//!
//! ```text
//! local call / inbound message
//!         │
//!         ▼
//!   TransactionManager ── resolve ──▶ Correlator ──▶ Cache / RecordStore
//!         │
//!         ├── check Operation preconditions
//!         ├── compare-and-set update
//!         └── one OutboundMessage ──▶ OutboundTransport
//! ```

pub mod config;
pub mod connection;
pub mod crypto;
pub mod events;
pub mod handlers;
pub mod ledger;
pub mod manager;
pub mod messages;
pub mod outbound;
pub mod storage;
pub mod transaction;

pub use connection::{ConnectionRecord, ConnectionRegistry, ConnectionResolver};
pub use events::ProtocolEvent;
pub use handlers::{HandleOutcome, InboundHandler, InboundMessage};
pub use manager::{
    ErrorKind, LocalIdentity, ManagerContext, ManagerError, NewRequest, TransactionManager,
};
pub use messages::ProtocolMessage;
pub use outbound::{OutboundMessage, OutboundTransport, QueuedTransport};
pub use transaction::{TransactionRecord, TransactionRole, TransactionState, TransactionType};
