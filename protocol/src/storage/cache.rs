//! In-process [`Cache`] with per-entry expiry.

use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use super::Cache;

#[derive(Debug, Clone)]
struct Entry {
    value: String,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.map_or(true, |t| now < t)
    }
}

/// Writes between sweeps never drop below this.
const MIN_SWEEP_WRITES: usize = 64;

/// Concurrent in-memory cache.
///
/// Expired entries are dropped on read, and by a sweep that runs once the
/// writes since the previous sweep reach half the map size.
#[derive(Debug, Default)]
pub struct MemoryCache {
    entries: DashMap<String, Entry>,
    writes_since_sweep: AtomicUsize,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored entries, expired ones included until swept.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop every expired entry. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, e| e.is_live(now));
        self.writes_since_sweep.store(0, Ordering::Relaxed);
        before.saturating_sub(self.entries.len())
    }

    fn note_write(&self) {
        let writes = self.writes_since_sweep.fetch_add(1, Ordering::Relaxed) + 1;
        if writes >= (self.entries.len() / 2).max(MIN_SWEEP_WRITES) {
            self.purge_expired();
        }
    }
}

#[async_trait]
impl Cache for MemoryCache {
    async fn get(&self, key: &str) -> Option<String> {
        let now = Instant::now();
        if let Some(entry) = self.entries.get(key) {
            if entry.is_live(now) {
                return Some(entry.value.clone());
            }
        }
        self.entries.remove_if(key, |_, e| !e.is_live(now));
        None
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) {
        // A lifetime past the end of the clock never expires.
        let entry = Entry {
            value: value.to_string(),
            expires_at: ttl.and_then(|d| Instant::now().checked_add(d)),
        };
        self.note_write();
        self.entries.insert(key.to_string(), entry);
    }

    async fn clear(&self, key: &str) {
        self.entries.remove(key);
    }
}
