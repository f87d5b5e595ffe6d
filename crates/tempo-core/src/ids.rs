//! Identifier newtypes shared across the coordinator.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Stable identifier for a user account.
pub type UserId = u64;

/// Identifier for a live room, handed out by persistence.
pub type RoomId = u64;

/// Identifier for a playlist item.
pub type PlaylistItemId = u64;

/// Opaque per-client-instance token derived from the auth credential.
/// Two hub connections from the same client instance share a token id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TokenId(pub String);

impl fmt::Display for TokenId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identifier for one hub (WebSocket) connection, assigned by the server
/// on upgrade.
pub type ConnectionId = u64;

/// Which hub endpoint a connection belongs to. A client instance may hold
/// at most one connection per kind at a time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HubKind {
    Multiplayer,
    Spectator,
}
