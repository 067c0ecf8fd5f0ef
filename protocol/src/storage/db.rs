//! # EndorseDb — Persistent Record Store
//!
//! sled-backed implementation of [`RecordStore`].
//!
//! ## Tree Layout
//!
//! | Tree           | Key                              | Value               |
//! |----------------|----------------------------------|---------------------|
//! | `transactions` | `transaction_id` (UTF-8)         | `json(Record)`      |
//! | `tags`         | `name \0 value \0 transaction_id` | empty               |
//! | `threads`      | `connection_id \0 thread_id`     | `transaction_id`    |
//!
//! The `tags` tree is a secondary index: a prefix scan over `name\0value\0`
//! yields the ids of every record carrying that tag. The `threads` tree
//! enforces that a `(connection_id, thread_id)` pair binds at most one
//! record.
//!
//! ## Atomicity
//!
//! Creates and updates run as sled multi-tree transactions over the record
//! and its index entries. An update reads the stored version inside the
//! transaction and aborts if it moved, which is what makes concurrent
//! transitions on one record safe.

use async_trait::async_trait;
use sled::transaction::{ConflictableTransactionError, TransactionError};
use sled::{Db, Transactional, Tree};
use std::collections::BTreeSet;
use std::path::Path;
use tracing::trace;

use super::{RecordStore, StoreError, StoreResult, TagFilter};
use crate::transaction::TransactionRecord;

// ---------------------------------------------------------------------------
// Key Encoding
// ---------------------------------------------------------------------------

const SEP: char = '\0';

fn tag_prefix(name: &str, value: &str) -> Vec<u8> {
    format!("{name}{SEP}{value}{SEP}").into_bytes()
}

fn tag_key(name: &str, value: &str, transaction_id: &str) -> Vec<u8> {
    let mut key = tag_prefix(name, value);
    key.extend_from_slice(transaction_id.as_bytes());
    key
}

fn thread_key(connection_id: &str, thread_id: &str) -> Vec<u8> {
    format!("{connection_id}{SEP}{thread_id}").into_bytes()
}

fn decode(bytes: &[u8]) -> StoreResult<TransactionRecord> {
    serde_json::from_slice(bytes).map_err(|e| StoreError::Serialization(e.to_string()))
}

fn encode(record: &TransactionRecord) -> StoreResult<Vec<u8>> {
    serde_json::to_vec(record).map_err(|e| StoreError::Serialization(e.to_string()))
}

fn abort<T>(err: StoreError) -> Result<T, ConflictableTransactionError<StoreError>> {
    Err(ConflictableTransactionError::Abort(err))
}

fn unwrap_tx_error(err: TransactionError<StoreError>) -> StoreError {
    match err {
        TransactionError::Abort(e) => e,
        TransactionError::Storage(e) => StoreError::Sled(e),
    }
}

// ---------------------------------------------------------------------------
// EndorseDb
// ---------------------------------------------------------------------------

/// Durable transaction record store.
///
/// Cheap to clone; clones share the same sled handle.
#[derive(Debug, Clone)]
pub struct EndorseDb {
    db: Db,
    /// Records by transaction id.
    records: Tree,
    /// Tag index.
    tags: Tree,
    /// `(connection_id, thread_id)` → transaction id.
    threads: Tree,
}

impl EndorseDb {
    /// Open or create a database at `path`.
    pub fn open<P: AsRef<Path>>(path: P) -> StoreResult<Self> {
        let db = sled::open(path)?;
        Self::from_db(db)
    }

    /// In-memory database removed on drop. Used by tests.
    pub fn open_temporary() -> StoreResult<Self> {
        let db = sled::Config::new().temporary(true).open()?;
        Self::from_db(db)
    }

    fn from_db(db: Db) -> StoreResult<Self> {
        let records = db.open_tree("transactions")?;
        let tags = db.open_tree("tags")?;
        let threads = db.open_tree("threads")?;
        Ok(Self {
            db,
            records,
            tags,
            threads,
        })
    }

    pub fn transaction_count(&self) -> usize {
        self.records.len()
    }

    /// Flush dirty buffers to disk.
    pub async fn flush(&self) -> StoreResult<()> {
        self.db.flush_async().await?;
        Ok(())
    }

    /// Transaction id bound to `(connection_id, thread_id)`, if any.
    pub fn thread_binding(&self, connection_id: &str, thread_id: &str) -> StoreResult<Option<String>> {
        Ok(self
            .threads
            .get(thread_key(connection_id, thread_id))?
            .map(|id| String::from_utf8_lossy(&id).into_owned()))
    }

    fn ids_with_tag(&self, name: &str, value: &str) -> StoreResult<BTreeSet<String>> {
        let prefix = tag_prefix(name, value);
        let mut ids = BTreeSet::new();
        for entry in self.tags.scan_prefix(&prefix) {
            let (key, _) = entry?;
            ids.insert(String::from_utf8_lossy(&key[prefix.len()..]).into_owned());
        }
        Ok(ids)
    }

    fn load(&self, transaction_id: &str) -> StoreResult<Option<TransactionRecord>> {
        self.records
            .get(transaction_id.as_bytes())?
            .map(|bytes| decode(&bytes))
            .transpose()
    }
}

#[async_trait]
impl RecordStore for EndorseDb {
    async fn create(&self, record: &TransactionRecord) -> StoreResult<()> {
        let id = record.transaction_id();
        let bytes = encode(record)?;
        let tkey = thread_key(record.connection_id(), record.thread_id());
        let tags = record.tags();

        (&self.records, &self.tags, &self.threads)
            .transaction(|(records, tag_index, threads)| {
                if let Some(existing) = threads.get(tkey.as_slice())? {
                    return abort(StoreError::DuplicateThread {
                        connection_id: record.connection_id().to_string(),
                        thread_id: record.thread_id().to_string(),
                        existing: String::from_utf8_lossy(&existing).into_owned(),
                    });
                }
                if records.get(id.as_bytes())?.is_some() {
                    return abort(StoreError::DuplicateId(id.to_string()));
                }
                records.insert(id.as_bytes(), bytes.as_slice())?;
                threads.insert(tkey.as_slice(), id.as_bytes())?;
                for (name, value) in &tags {
                    tag_index.insert(tag_key(name, value, id), &[] as &[u8])?;
                }
                Ok(())
            })
            .map_err(unwrap_tx_error)?;

        trace!(transaction_id = id, "record created");
        self.flush().await
    }

    async fn retrieve_by_id(&self, transaction_id: &str) -> StoreResult<TransactionRecord> {
        self.load(transaction_id)?
            .ok_or_else(|| StoreError::NotFound(transaction_id.to_string()))
    }

    async fn find_by_tags(&self, filter: &TagFilter) -> StoreResult<Vec<TransactionRecord>> {
        let mut found = Vec::new();

        if filter.is_empty() {
            for entry in self.records.iter() {
                let (_, bytes) = entry?;
                found.push(decode(&bytes)?);
            }
        } else {
            let mut candidates: Option<BTreeSet<String>> = None;
            for (name, value) in filter.iter() {
                let ids = self.ids_with_tag(name, value)?;
                candidates = Some(match candidates {
                    None => ids,
                    Some(prev) => prev.intersection(&ids).cloned().collect(),
                });
            }
            for id in candidates.unwrap_or_default() {
                // The index can briefly lead a concurrent update; re-check.
                if let Some(record) = self.load(&id)? {
                    if filter.matches(&record) {
                        found.push(record);
                    }
                }
            }
        }

        found.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(found)
    }

    async fn update(&self, record: &TransactionRecord) -> StoreResult<TransactionRecord> {
        let id = record.transaction_id();
        let expected = record.version();
        let mut next = record.clone();
        next.set_version(expected + 1);
        let bytes = encode(&next)?;
        let new_tags = next.tags();

        (&self.records, &self.tags)
            .transaction(|(records, tag_index)| {
                let current = match records.get(id.as_bytes())? {
                    Some(raw) => match decode(&raw) {
                        Ok(rec) => rec,
                        Err(e) => return abort(e),
                    },
                    None => return abort(StoreError::NotFound(id.to_string())),
                };
                if current.version() != expected {
                    return abort(StoreError::Conflict {
                        transaction_id: id.to_string(),
                        expected,
                    });
                }
                for (name, value) in current.tags() {
                    tag_index.remove(tag_key(name, &value, id))?;
                }
                for (name, value) in &new_tags {
                    tag_index.insert(tag_key(name, value, id), &[] as &[u8])?;
                }
                records.insert(id.as_bytes(), bytes.as_slice())?;
                Ok(())
            })
            .map_err(unwrap_tx_error)?;

        trace!(transaction_id = id, version = next.version(), "record updated");
        self.flush().await?;
        Ok(next)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
