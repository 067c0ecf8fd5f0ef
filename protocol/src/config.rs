//! # Protocol Configuration & Constants
//!
//! Every identifier that goes on the wire lives here, next to the tunables
//! of the transaction manager. Message type URIs are part of the protocol
//! contract with the counterpart agent: changing one after deployment means
//! the other side stops recognizing our messages.

use std::time::Duration;

// ---------------------------------------------------------------------------
// Protocol Identifiers
// ---------------------------------------------------------------------------

/// Protocol family and version. Every message `@type` starts with this.
pub const PROTOCOL_URI: &str = "https://didcomm.org/transactions/1.0";

/// Crate-level protocol version, reported by the node.
pub const PROTOCOL_VERSION: &str = "1.0";

/// `@type` of the author's initial request.
pub const TRANSACTION_REQUEST: &str = "https://didcomm.org/transactions/1.0/request";

/// `@type` of the endorser's approval.
pub const ENDORSED_TRANSACTION_RESPONSE: &str = "https://didcomm.org/transactions/1.0/endorse";

/// `@type` of the endorser's rejection.
pub const REFUSED_TRANSACTION_RESPONSE: &str = "https://didcomm.org/transactions/1.0/refuse";

/// `@type` of the author's withdrawal.
pub const CANCEL_TRANSACTION: &str = "https://didcomm.org/transactions/1.0/cancel";

/// `@type` of a re-delivered request.
pub const TRANSACTION_RESEND: &str = "https://didcomm.org/transactions/1.0/resend";

/// `@type` of the attached-message envelope.
pub const ATTACHED_MESSAGE: &str = "https://didcomm.org/transactions/1.0/attached-message";

// ---------------------------------------------------------------------------
// Envelope Defaults
// ---------------------------------------------------------------------------

/// MIME type of every envelope we construct. The payload is always JSON.
pub const ATTACHMENT_MIME_TYPE: &str = "application/json";

/// Description stamped on envelopes built by `create_request`.
pub const ATTACHMENT_DESCRIPTION: &str = "The roles related to endorsement protocol";

// ---------------------------------------------------------------------------
// Signature Request Defaults
// ---------------------------------------------------------------------------

/// Signature context of a ledger endorsement.
pub const SIGNATURE_CONTEXT: &str = "did:sov";

/// Method the endorser is asked to perform.
pub const SIGNATURE_METHOD: &str = "add-signature";

/// Signature scheme requested from the endorser.
pub const SIGNATURE_TYPE: &str = "<ed25519>";

/// Goal code the endorser signs under.
pub const SIGNER_GOAL_CODE: &str = "transaction.endorse";

/// Goal code the author pursues with the endorsed transaction.
pub const AUTHOR_GOAL_CODE: &str = "ledger.transaction.write";

// ---------------------------------------------------------------------------
// Correlation Cache
// ---------------------------------------------------------------------------

/// Namespace prefix of correlation cache keys:
/// `"<namespace>::<connection_id>::<thread_id>"`.
pub const CORRELATION_CACHE_NAMESPACE: &str = "transaction_ctidx";

/// How long a correlation entry stays in the cache by default.
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(3600);

// ---------------------------------------------------------------------------
// Manager Tunables
// ---------------------------------------------------------------------------

/// Optimistic-concurrency retries before a transition gives up with
/// `ManagerError::Conflict`. Each retry reloads the record and re-checks the
/// precondition, so a lost race usually ends in a precondition failure
/// long before this bound is reached.
pub const DEFAULT_MAX_TRANSITION_RETRIES: usize = 3;

/// Window the endorser is given when the author does not specify `timing`.
pub const DEFAULT_ENDORSE_EXPIRY: Duration = Duration::from_secs(24 * 3600);

/// Capacity of the protocol event broadcast channel.
pub const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Runtime knobs of the [`TransactionManager`](crate::manager::TransactionManager).
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    /// Bound on compare-and-set retries per transition.
    pub max_transition_retries: usize,
    /// Lifetime of correlation cache entries. `None` keeps them forever.
    pub cache_ttl: Option<Duration>,
    /// Default `timing.expires_time` offset for new requests.
    pub default_expiry: Duration,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            max_transition_retries: DEFAULT_MAX_TRANSITION_RETRIES,
            cache_ttl: Some(DEFAULT_CACHE_TTL),
            default_expiry: DEFAULT_ENDORSE_EXPIRY,
        }
    }
}
