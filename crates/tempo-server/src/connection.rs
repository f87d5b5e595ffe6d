//! Connection state registry and limiter.
//!
//! One `ConnectionState` per user, tracked in an `EntityStore` keyed by
//! `UserId`. `room_id` folds the user's current-room membership into the
//! same entity the coordinator already locks first (its canonical lock
//! order), rather than standing up a second store for one optional field.

use std::collections::HashMap;

use tempo_core::ids::{ConnectionId, HubKind, RoomId, TokenId, UserId};

/// What the server knows about a user's live connections.
#[derive(Debug, Clone)]
pub struct ConnectionState {
    pub token_id: TokenId,
    connections: HashMap<HubKind, ConnectionId>,
    pub room_id: Option<RoomId>,
}

impl ConnectionState {
    pub fn new(token_id: TokenId) -> Self {
        Self {
            token_id,
            connections: HashMap::new(),
            room_id: None,
        }
    }

    pub fn connection_for(&self, kind: HubKind) -> Option<ConnectionId> {
        self.connections.get(&kind).copied()
    }

    /// Record a new connection for `kind`, returning the connection id it
    /// superseded, if any — the caller must send that superseded
    /// connection a `DisconnectRequested` before dropping it.
    pub fn supersede(&mut self, kind: HubKind, new_id: ConnectionId) -> Option<ConnectionId> {
        self.connections.insert(kind, new_id)
    }

    /// Clear a connection slot, but only if `id` still matches what's
    /// recorded — an already-superseded connection tearing down must not
    /// clobber its successor's slot.
    pub fn clear_if_current(&mut self, kind: HubKind, id: ConnectionId) {
        if self.connections.get(&kind) == Some(&id) {
            self.connections.remove(&kind);
        }
    }

    pub fn has_any_connection(&self) -> bool {
        !self.connections.is_empty()
    }
}
