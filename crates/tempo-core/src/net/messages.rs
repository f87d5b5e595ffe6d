//! Wire message shapes exchanged over the multiplayer hub.

use serde::{Deserialize, Serialize};

use crate::ids::{PlaylistItemId, RoomId, UserId};
use crate::match_type::MatchTypeRequest;
use crate::playlist::{PlaylistItem, PlaylistItemFields};
use crate::room::{RoomSettings, RoomSnapshot};
use crate::user::{BeatmapAvailability, ModEntry, RoomUserState};

/// Messages a client may send to the multiplayer hub.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ClientMessage {
    JoinRoom {
        room_id: RoomId,
        password: Option<String>,
    },
    LeaveRoom,
    ChangeState {
        state: RoomUserState,
    },
    ChangeSettings {
        settings: RoomSettings,
    },
    ChangeUserMods {
        mods: Vec<ModEntry>,
    },
    ChangeBeatmapAvailability {
        availability: BeatmapAvailability,
    },
    SendMatchRequest {
        request: MatchRequestKind,
    },
    StartMatch,
    AbortGameplay,
    TransferHost {
        new_host_id: UserId,
    },
    KickUser {
        user_id: UserId,
    },
    AddPlaylistItem {
        item: PlaylistItemFields,
    },
    EditPlaylistItem {
        item_id: PlaylistItemId,
        item: PlaylistItemFields,
    },
    RemovePlaylistItem {
        item_id: PlaylistItemId,
    },
    InvitePlayer {
        user_id: UserId,
    },
}

/// The countdown-control and match-type-strategy requests that
/// `SendMatchRequest` may carry (countdown tags are handled by
/// the coordinator, everything else is delegated to the match type).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MatchRequestKind {
    StartCountdown { duration_secs: u64 },
    StopCountdown,
    MatchType(MatchTypeRequest),
}

/// Messages the server pushes to hub clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ServerMessage {
    RoomState {
        room: RoomSnapshot,
    },
    UserJoined {
        user_id: UserId,
    },
    UserLeft {
        user_id: UserId,
    },
    UserKicked {
        user_id: UserId,
    },
    HostChanged {
        user_id: UserId,
    },
    SettingsChanged {
        settings: RoomSettings,
    },
    UserStateChanged {
        user_id: UserId,
        state: RoomUserState,
    },
    RoomStateChanged {
        state: crate::room::RoomState,
    },
    UserBeatmapAvailabilityChanged {
        user_id: UserId,
        availability: BeatmapAvailability,
    },
    UserModsChanged {
        user_id: UserId,
        mods: Vec<ModEntry>,
    },
    CountdownStarted {
        duration_secs: u64,
    },
    CountdownStopped,
    MatchStarted {
        user_ids: Vec<UserId>,
    },
    LoadRequested,
    ResultsReady,
    PlaylistItemAdded {
        item: PlaylistItem,
    },
    PlaylistItemChanged {
        item: PlaylistItem,
    },
    PlaylistItemRemoved {
        item_id: PlaylistItemId,
    },
    Invited {
        from_user_id: UserId,
        room_id: RoomId,
    },
    DisconnectRequested,
    Error {
        message: String,
    },
}
