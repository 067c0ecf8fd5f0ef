//! Maps an inbound `(connection_id, thread_id)` pair to the local record.
//!
//! Lookups go through the cache first. A cached id that no longer resolves
//! to a matching record is treated as a miss: the entry is cleared and the
//! store's tag index is consulted instead.

use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, trace};

use crate::config::CORRELATION_CACHE_NAMESPACE;
use crate::storage::{Cache, RecordStore, StoreError, StoreResult, TagFilter};
use crate::transaction::TransactionRecord;

/// Cache key of a `(connection_id, thread_id)` pair.
pub fn cache_key(connection_id: &str, thread_id: &str) -> String {
    format!("{CORRELATION_CACHE_NAMESPACE}::{connection_id}::{thread_id}")
}

#[derive(Clone)]
pub struct Correlator {
    store: Arc<dyn RecordStore>,
    cache: Arc<dyn Cache>,
    ttl: Option<Duration>,
}

impl Correlator {
    pub fn new(store: Arc<dyn RecordStore>, cache: Arc<dyn Cache>, ttl: Option<Duration>) -> Self {
        Self { store, cache, ttl }
    }

    /// The record bound to the pair, if any.
    ///
    /// An empty `connection_id` matches records on any connection; the
    /// oldest wins.
    pub async fn resolve(
        &self,
        connection_id: &str,
        thread_id: &str,
    ) -> StoreResult<Option<TransactionRecord>> {
        let key = cache_key(connection_id, thread_id);

        if let Some(id) = self.cache.get(&key).await {
            match self.store.retrieve_by_id(&id).await {
                Ok(record) if Self::binds(&record, connection_id, thread_id) => {
                    trace!(%key, transaction_id = %id, "correlation cache hit");
                    return Ok(Some(record));
                }
                Ok(_) | Err(StoreError::NotFound(_)) => {
                    debug!(%key, transaction_id = %id, "stale correlation entry");
                    self.cache.clear(&key).await;
                }
                Err(e) => return Err(e),
            }
        }

        let mut filter = TagFilter::new().with("thread_id", thread_id);
        if !connection_id.is_empty() {
            filter = filter.with("connection_id", connection_id);
        }
        let found = self.store.find_by_tags(&filter).await?.into_iter().next();

        if let Some(record) = &found {
            self.cache.set(&key, record.transaction_id(), self.ttl).await;
        }
        Ok(found)
    }

    /// Remember the binding of a freshly persisted record.
    pub async fn remember(&self, record: &TransactionRecord) {
        let key = cache_key(record.connection_id(), record.thread_id());
        self.cache.set(&key, record.transaction_id(), self.ttl).await;
    }

    fn binds(record: &TransactionRecord, connection_id: &str, thread_id: &str) -> bool {
        record.thread_id() == thread_id
            && (connection_id.is_empty() || record.connection_id() == connection_id)
    }
}
