//! # Storage Module
//!
//! Persistence for transaction records and the correlation cache.
//!
//! ## Architecture
//!
//! ```text
//! mod.rs   — RecordStore / Cache traits, TagFilter, StoreError
//! db.rs    — EndorseDb: sled-backed RecordStore with tag and thread indexes
//! cache.rs — MemoryCache: DashMap-backed Cache with per-entry TTL
//! ```
//!
//! ## Design Decisions
//!
//! 1. **Compare-and-set updates.** Every record carries a `version`. An
//!    update written against a stale version fails with
//!    [`StoreError::Conflict`] instead of silently overwriting a concurrent
//!    transition. The manager reloads and re-checks on conflict.
//!
//! 2. **JSON on disk.** Records embed opaque JSON payloads, which only a
//!    self-describing format can round-trip.
//!
//! 3. **The cache is an accelerator.** Nothing correct depends on an entry
//!    being present; the store is always authoritative.

pub mod cache;
pub mod db;

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::time::Duration;

use crate::transaction::TransactionRecord;

pub use cache::MemoryCache;
pub use db::EndorseDb;

// ---------------------------------------------------------------------------
// Error Type
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("sled error: {0}")]
    Sled(#[from] sled::Error),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("transaction not found: {0}")]
    NotFound(String),

    #[error("transaction {transaction_id} was modified concurrently (expected version {expected})")]
    Conflict { transaction_id: String, expected: u64 },

    #[error("thread {thread_id} on connection {connection_id} already belongs to transaction {existing}")]
    DuplicateThread {
        connection_id: String,
        thread_id: String,
        existing: String,
    },

    #[error("transaction id already exists: {0}")]
    DuplicateId(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

// ---------------------------------------------------------------------------
// Tag Filter
// ---------------------------------------------------------------------------

/// Conjunction of exact tag matches. An empty filter matches everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TagFilter {
    tags: BTreeMap<String, String>,
}

impl TagFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(name.into(), value.into());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.tags.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.tags.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn matches(&self, record: &TransactionRecord) -> bool {
        let tags = record.tags();
        self.iter()
            .all(|(name, value)| tags.get(name).is_some_and(|v| v == value))
    }
}

// ---------------------------------------------------------------------------
// Traits
// ---------------------------------------------------------------------------

/// Durable store of transaction records.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Persist a new record. Fails if its `(connection_id, thread_id)` pair
    /// is already bound to another record.
    async fn create(&self, record: &TransactionRecord) -> StoreResult<()>;

    async fn retrieve_by_id(&self, transaction_id: &str) -> StoreResult<TransactionRecord>;

    /// All records matching `filter`, oldest first.
    async fn find_by_tags(&self, filter: &TagFilter) -> StoreResult<Vec<TransactionRecord>>;

    /// Write `record` if the stored version still equals `record.version()`.
    /// Returns the record as stored, with its version bumped.
    async fn update(&self, record: &TransactionRecord) -> StoreResult<TransactionRecord>;
}

/// Key/value cache with optional expiry.
#[async_trait]
pub trait Cache: Send + Sync {
    async fn get(&self, key: &str) -> Option<String>;
    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>);
    async fn clear(&self, key: &str);
}
