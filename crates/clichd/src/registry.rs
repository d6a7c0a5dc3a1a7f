//! Registry of connected clients.
//!
//! Maps each live connection handle to the identity it presented during the
//! handshake. The map sits behind a single `std::sync::Mutex`; every
//! operation holds it only for the map access itself, so it can never be
//! held across an `.await`.
//!
//! # Panic-Free Guarantees
//!
//! A poisoned lock is recovered with `PoisonError::into_inner`: the map is
//! only ever mutated by single insert/remove calls, so it is consistent even
//! if a holder panicked.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use thiserror::Error;

use clich_core::{ClientIdentity, ConnectionId};

use crate::hub::PeerConnection;

/// One registered connection.
#[derive(Debug, Clone)]
pub struct RegistryEntry {
    /// Outbound handle (also the registry key, via its id)
    pub connection: Arc<PeerConnection>,

    /// Identity presented in the handshake
    pub identity: ClientIdentity,

    /// When the handshake completed
    pub connected_at: DateTime<Utc>,
}

impl RegistryEntry {
    pub fn id(&self) -> ConnectionId {
        self.connection.id()
    }
}

/// Lock-protected map of live connections.
pub struct ClientRegistry {
    entries: Mutex<BTreeMap<ConnectionId, RegistryEntry>>,
    max_connections: usize,
}

impl ClientRegistry {
    /// Creates an empty registry holding at most `max_connections` entries.
    pub fn new(max_connections: usize) -> Self {
        Self {
            entries: Mutex::new(BTreeMap::new()),
            max_connections,
        }
    }

    /// Inserts a connection.
    ///
    /// # Errors
    ///
    /// - `RegistryError::DuplicateConnection` if the handle is already registered
    /// - `RegistryError::RegistryFull` if the registry is at capacity
    pub fn register(
        &self,
        connection: Arc<PeerConnection>,
        identity: ClientIdentity,
    ) -> Result<(), RegistryError> {
        let id = connection.id();
        let mut entries = self.lock();

        if entries.contains_key(&id) {
            return Err(RegistryError::DuplicateConnection { conn_id: id });
        }
        if entries.len() >= self.max_connections {
            return Err(RegistryError::RegistryFull {
                max: self.max_connections,
            });
        }

        entries.insert(
            id,
            RegistryEntry {
                connection,
                identity,
                connected_at: Utc::now(),
            },
        );
        Ok(())
    }

    /// Removes a connection. Removing an absent connection is a no-op.
    pub fn remove(&self, id: ConnectionId) -> Option<RegistryEntry> {
        self.lock().remove(&id)
    }

    /// Point-in-time copy of every entry, in admission order.
    pub fn snapshot(&self) -> Vec<RegistryEntry> {
        self.lock().values().cloned().collect()
    }

    pub fn contains(&self, id: ConnectionId) -> bool {
        self.lock().contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<ConnectionId, RegistryEntry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Errors that can occur during registry operations.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("Connection already registered: {conn_id}")]
    DuplicateConnection { conn_id: ConnectionId },

    #[error("Registry is full (max: {max})")]
    RegistryFull { max: usize },
}
