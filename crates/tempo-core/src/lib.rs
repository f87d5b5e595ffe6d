//! Shared, synchronous domain types for the multiplayer room coordinator:
//! ids, the room/user/playlist/match-type model, and the wire protocol.
//! No I/O and no locking lives here — see `tempo-server` for that.

pub mod countdown;
pub mod error;
pub mod ids;
pub mod match_type;
pub mod net;
pub mod playlist;
pub mod room;
pub mod user;

#[cfg(any(test, feature = "test-helpers"))]
pub mod test_helpers {
    use crate::ids::RoomId;
    use crate::match_type::MatchTypeKind;
    use crate::playlist::QueueMode;
    use crate::room::{Room, RoomSettings};

    /// A minimal room with the given id, no password, head-to-head match
    /// type, and a host-only queue — the default shape most coordinator
    /// tests start from.
    pub fn make_room(id: RoomId) -> Room {
        Room::new(
            id,
            RoomSettings {
                name: format!("room-{id}"),
                password: None,
                match_type: MatchTypeKind::HeadToHead,
                queue_mode: QueueMode::HostOnly,
                auto_start_duration: None,
            },
        )
    }
}
