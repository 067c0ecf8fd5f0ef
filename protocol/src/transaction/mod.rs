//! # Transaction Module
//!
//! The records both agents keep for an endorsement exchange, and the state
//! machine that governs them.
//!
//! ## Architecture
//!
//! ```text
//! types.rs  — Transaction type, roles, signature descriptors, timing
//! state.rs  — TransactionState and the Operation precondition table
//! record.rs — TransactionRecord, the persisted unit, and its tags
//! ```
//!
//! ## Design Decisions
//!
//! - The author and the endorser never share a record. Each keeps its own,
//!   correlated with the other side's by `(connection_id, thread_id)`.
//! - Preconditions live in one table ([`Operation::permits`]) instead of
//!   being scattered across handlers, so the reachability properties of the
//!   machine can be tested directly.
//! - Records carry a `version` counter; the store refuses writes made
//!   against a stale version.

pub mod record;
pub mod state;
pub mod types;

pub use record::{TransactionRecord, TransitionError, TAG_NAMES};
pub use state::{Operation, TransactionState};
pub use types::{
    AttachFormat, ParseError, SignatureRequest, SignatureResponse, Timing, TransactionRole,
    TransactionType,
};
