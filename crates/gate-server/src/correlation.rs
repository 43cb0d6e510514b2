//! CorrelationTable: pending handshakes keyed by their client nonce.
//!
//! The interceptor inserts `key → id` before asking the authorizer and marks
//! the entry accepted once the verdict allows the upgrade; the binder takes
//! the entry once the socket is up. Refused or abandoned handshakes are
//! released by the interceptor. Accepted entries that are never bound are
//! purged once they outlive the handshake timeout.

use std::time::{Duration, Instant};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use gate_protocol::{ConnectionId, CorrelationKey, GateError, GateResult};

#[derive(Debug, Clone, Copy)]
enum EntryState {
    /// The authorizer has not answered yet. Never expires.
    Verifying,
    /// Accepted and waiting for the connection to be established.
    Accepted { decided_at: Instant },
}

#[derive(Debug, Clone, Copy)]
struct PendingEntry {
    connection_id: ConnectionId,
    state: EntryState,
}

impl PendingEntry {
    fn new(connection_id: ConnectionId) -> Self {
        Self {
            connection_id,
            state: EntryState::Verifying,
        }
    }

    fn is_expired(&self, ttl: Duration) -> bool {
        match self.state {
            EntryState::Verifying => false,
            EntryState::Accepted { decided_at } => decided_at.elapsed() >= ttl,
        }
    }
}

/// Concurrent `CorrelationKey → ConnectionId` map.
///
/// The TTL runs from the accept decision, so an entry whose authorizer is
/// still suspended is never purged or replaced.
#[derive(Debug)]
pub struct CorrelationTable {
    entries: DashMap<CorrelationKey, PendingEntry>,
    ttl: Duration,
}

impl CorrelationTable {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
        }
    }

    /// Record a handshake that is about to be verified.
    ///
    /// Fails with [`GateError::KeyInUse`] while another handshake holds the
    /// same key, unless that holder was accepted and then left unbound past
    /// the TTL, in which case it is replaced.
    pub fn insert(&self, key: CorrelationKey, connection_id: ConnectionId) -> GateResult<()> {
        match self.entries.entry(key) {
            Entry::Occupied(mut occupied) => {
                if !occupied.get().is_expired(self.ttl) {
                    return Err(GateError::KeyInUse(occupied.key().clone()));
                }
                occupied.insert(PendingEntry::new(connection_id));
            }
            Entry::Vacant(vacant) => {
                vacant.insert(PendingEntry::new(connection_id));
            }
        }
        Ok(())
    }

    /// Start the TTL for `key` if it still belongs to `connection_id`.
    ///
    /// Returns `false` when the entry is gone, e.g. after [`clear`](Self::clear).
    pub fn mark_accepted(&self, key: &CorrelationKey, connection_id: ConnectionId) -> bool {
        match self.entries.get_mut(key) {
            Some(mut entry) if entry.connection_id == connection_id => {
                entry.state = EntryState::Accepted {
                    decided_at: Instant::now(),
                };
                true
            }
            _ => false,
        }
    }

    /// Remove and return the identifier for `key` (read-once).
    pub fn take(&self, key: &CorrelationKey) -> Option<ConnectionId> {
        self.entries.remove(key).map(|(_, entry)| entry.connection_id)
    }

    /// Look up without consuming.
    pub fn get(&self, key: &CorrelationKey) -> Option<ConnectionId> {
        self.entries.get(key).map(|entry| entry.connection_id)
    }

    /// Release `key` only if it still belongs to `connection_id`.
    pub fn release(&self, key: &CorrelationKey, connection_id: ConnectionId) -> bool {
        self.entries
            .remove_if(key, |_, entry| entry.connection_id == connection_id)
            .is_some()
    }

    /// Drop every accepted entry left unbound past the TTL. Returns how many
    /// were dropped.
    pub fn purge_expired(&self) -> usize {
        let ttl = self.ttl;
        let mut purged = 0;
        self.entries.retain(|_, entry| {
            let expired = entry.is_expired(ttl);
            if expired {
                purged += 1;
            }
            !expired
        });
        purged
    }

    pub fn clear(&self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
