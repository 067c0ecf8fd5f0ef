//! Everything a [`TransactionManager`](super::TransactionManager) needs from
//! its surroundings, passed in explicitly.

use std::sync::Arc;

use crate::config::ManagerConfig;
use crate::connection::ConnectionResolver;
use crate::crypto::AgentKeypair;
use crate::events::{self, EventReceiver, EventSender};
use crate::outbound::OutboundTransport;
use crate::storage::{Cache, RecordStore};

/// Who the local agent is.
#[derive(Debug, Clone)]
pub struct LocalIdentity {
    pub label: String,
    pub keypair: AgentKeypair,
}

impl LocalIdentity {
    pub fn new(label: impl Into<String>, keypair: AgentKeypair) -> Self {
        Self {
            label: label.into(),
            keypair,
        }
    }
}

/// Collaborators of the manager. Cheap to clone.
#[derive(Clone)]
pub struct ManagerContext {
    pub store: Arc<dyn RecordStore>,
    pub cache: Arc<dyn Cache>,
    pub connections: Arc<dyn ConnectionResolver>,
    pub transport: Arc<dyn OutboundTransport>,
    pub identity: Arc<LocalIdentity>,
    pub events: EventSender,
    pub config: ManagerConfig,
}

impl ManagerContext {
    /// Context with default config and a fresh event channel.
    pub fn new(
        store: Arc<dyn RecordStore>,
        cache: Arc<dyn Cache>,
        connections: Arc<dyn ConnectionResolver>,
        transport: Arc<dyn OutboundTransport>,
        identity: LocalIdentity,
    ) -> Self {
        let (events, _) = events::channel();
        Self {
            store,
            cache,
            connections,
            transport,
            identity: Arc::new(identity),
            events,
            config: ManagerConfig::default(),
        }
    }

    pub fn with_config(mut self, config: ManagerConfig) -> Self {
        self.config = config;
        self
    }

    /// Publish on an existing channel instead of the context's own.
    pub fn with_events(mut self, events: EventSender) -> Self {
        self.events = events;
        self
    }

    pub fn subscribe(&self) -> EventReceiver {
        self.events.subscribe()
    }
}
