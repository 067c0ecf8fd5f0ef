//! # Connections
//!
//! A connection is an established pairwise channel to one counterpart
//! agent. This crate does not establish connections; it only needs to know
//! which exist and which role we play on each.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::transaction::TransactionRole;

/// What we know about one connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionRecord {
    pub connection_id: String,
    /// Human-readable name of the counterpart.
    pub label: String,
    /// Role the local agent plays in endorsement exchanges on this connection.
    pub my_role: TransactionRole,
    pub created_at: DateTime<Utc>,
}

impl ConnectionRecord {
    pub fn new(label: impl Into<String>, my_role: TransactionRole) -> Self {
        Self::with_id(Uuid::new_v4().to_string(), label, my_role)
    }

    pub fn with_id(
        connection_id: impl Into<String>,
        label: impl Into<String>,
        my_role: TransactionRole,
    ) -> Self {
        Self {
            connection_id: connection_id.into(),
            label: label.into(),
            my_role,
            created_at: Utc::now(),
        }
    }
}

/// Looks up connections by id.
#[async_trait]
pub trait ConnectionResolver: Send + Sync {
    async fn resolve(&self, connection_id: &str) -> Option<ConnectionRecord>;
}

/// In-memory connection table.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    connections: DashMap<String, ConnectionRecord>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a connection. Returns the stored record.
    pub fn register(&self, record: ConnectionRecord) -> ConnectionRecord {
        self.connections
            .insert(record.connection_id.clone(), record.clone());
        record
    }

    pub fn get(&self, connection_id: &str) -> Option<ConnectionRecord> {
        self.connections.get(connection_id).map(|c| c.clone())
    }

    pub fn remove(&self, connection_id: &str) -> Option<ConnectionRecord> {
        self.connections.remove(connection_id).map(|(_, c)| c)
    }

    /// All connections, oldest first.
    pub fn list(&self) -> Vec<ConnectionRecord> {
        let mut all: Vec<_> = self.connections.iter().map(|c| c.clone()).collect();
        all.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        all
    }
}

#[async_trait]
impl ConnectionResolver for ConnectionRegistry {
    async fn resolve(&self, connection_id: &str) -> Option<ConnectionRecord> {
        self.get(connection_id)
    }
}
