//! The relational persistence layer is an external collaborator: this
//! module only defines the call contract the coordinator relies on, plus
//! an in-memory implementation for tests and local development.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::Mutex;

use tempo_core::ids::{PlaylistItemId, RoomId, UserId};
use tempo_core::playlist::{PlaylistItem, PlaylistItemFields, QueueMode};
use tempo_core::room::RoomSettings;

/// What persistence knows about a room before it's been activated
/// in-memory (`getRoom`).
#[derive(Debug, Clone)]
pub struct PersistedRoom {
    pub settings: RoomSettings,
    pub host_user_id: UserId,
}

#[derive(Debug, thiserror::Error)]
pub enum PersistenceError {
    #[error("room not found")]
    RoomNotFound,
    #[error("beatmap not found")]
    BeatmapNotFound,
}

/// Call contract for the relational persistence layer. Real
/// adapters (a database-backed implementation) are out of scope; this
/// trait exists so the coordinator can be driven against a test double.
#[async_trait]
pub trait Persistence: Send + Sync {
    async fn get_room(&self, room_id: RoomId) -> Result<PersistedRoom, PersistenceError>;
    async fn mark_room_active(&self, room_id: RoomId) -> Result<(), PersistenceError>;
    async fn update_room_settings(
        &self,
        room_id: RoomId,
        settings: &RoomSettings,
    ) -> Result<(), PersistenceError>;
    async fn update_room_host(&self, room_id: RoomId, host_user_id: UserId) -> Result<(), PersistenceError>;
    async fn end_match(&self, room_id: RoomId) -> Result<(), PersistenceError>;
    async fn add_participant(&self, room_id: RoomId, user_id: UserId) -> Result<(), PersistenceError>;
    async fn remove_participant(&self, room_id: RoomId, user_id: UserId) -> Result<(), PersistenceError>;
    async fn get_current_playlist_item(
        &self,
        room_id: RoomId,
    ) -> Result<Option<PlaylistItem>, PersistenceError>;
    async fn add_playlist_item(
        &self,
        room_id: RoomId,
        owner_id: UserId,
        fields: PlaylistItemFields,
    ) -> Result<PlaylistItemId, PersistenceError>;
    async fn update_playlist_item(
        &self,
        room_id: RoomId,
        item: &PlaylistItem,
    ) -> Result<(), PersistenceError>;
    async fn remove_playlist_item(
        &self,
        room_id: RoomId,
        item_id: PlaylistItemId,
    ) -> Result<(), PersistenceError>;
    async fn mark_playlist_item_played(
        &self,
        room_id: RoomId,
        item_id: PlaylistItemId,
    ) -> Result<(), PersistenceError>;
    async fn get_all_playlist_items(&self, room_id: RoomId) -> Result<Vec<PlaylistItem>, PersistenceError>;
    async fn get_beatmap_checksum(&self, beatmap_id: u64) -> Result<Option<String>, PersistenceError>;
    async fn is_user_restricted(&self, user_id: UserId) -> Result<bool, PersistenceError>;
    async fn is_user_blocked(&self, owner_id: UserId, target_id: UserId) -> Result<bool, PersistenceError>;
    async fn user_blocks_pms(&self, user_id: UserId) -> Result<bool, PersistenceError>;
}

/// In-memory `Persistence` double. Rooms must be seeded via `seed_room`
/// before `get_room` will find them — mirrors a real backend where a room
/// row is created out-of-band (e.g. by a matchmaking or lobby-browser
/// service) before the coordinator ever touches it.
#[derive(Default)]
pub struct InMemoryPersistence {
    rooms: Mutex<HashMap<RoomId, PersistedRoom>>,
    restricted: Mutex<std::collections::HashSet<UserId>>,
    blocks: Mutex<std::collections::HashSet<(UserId, UserId)>>,
    pm_blockers: Mutex<std::collections::HashSet<UserId>>,
    beatmap_checksums: Mutex<HashMap<u64, String>>,
}

impl InMemoryPersistence {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn seed_room(&self, room_id: RoomId, room: PersistedRoom) {
        self.rooms.lock().await.insert(room_id, room);
    }

    pub async fn seed_restricted_user(&self, user_id: UserId) {
        self.restricted.lock().await.insert(user_id);
    }

    pub async fn seed_block(&self, owner_id: UserId, target_id: UserId) {
        self.blocks.lock().await.insert((owner_id, target_id));
    }

    pub async fn seed_pm_blocker(&self, user_id: UserId) {
        self.pm_blockers.lock().await.insert(user_id);
    }

    pub async fn seed_beatmap(&self, beatmap_id: u64, checksum: &str) {
        self.beatmap_checksums
            .lock()
            .await
            .insert(beatmap_id, checksum.to_string());
    }
}

#[async_trait]
impl Persistence for InMemoryPersistence {
    async fn get_room(&self, room_id: RoomId) -> Result<PersistedRoom, PersistenceError> {
        self.rooms
            .lock()
            .await
            .get(&room_id)
            .cloned()
            .ok_or(PersistenceError::RoomNotFound)
    }

    async fn mark_room_active(&self, _room_id: RoomId) -> Result<(), PersistenceError> {
        Ok(())
    }

    async fn update_room_settings(
        &self,
        room_id: RoomId,
        settings: &RoomSettings,
    ) -> Result<(), PersistenceError> {
        let mut rooms = self.rooms.lock().await;
        let room = rooms.get_mut(&room_id).ok_or(PersistenceError::RoomNotFound)?;
        room.settings = settings.clone();
        Ok(())
    }

    async fn update_room_host(&self, room_id: RoomId, host_user_id: UserId) -> Result<(), PersistenceError> {
        let mut rooms = self.rooms.lock().await;
        let room = rooms.get_mut(&room_id).ok_or(PersistenceError::RoomNotFound)?;
        room.host_user_id = host_user_id;
        Ok(())
    }

    async fn end_match(&self, _room_id: RoomId) -> Result<(), PersistenceError> {
        Ok(())
    }

    async fn add_participant(&self, _room_id: RoomId, _user_id: UserId) -> Result<(), PersistenceError> {
        Ok(())
    }

    async fn remove_participant(&self, _room_id: RoomId, _user_id: UserId) -> Result<(), PersistenceError> {
        Ok(())
    }

    async fn get_current_playlist_item(
        &self,
        _room_id: RoomId,
    ) -> Result<Option<PlaylistItem>, PersistenceError> {
        Ok(None)
    }

    async fn add_playlist_item(
        &self,
        _room_id: RoomId,
        _owner_id: UserId,
        _fields: PlaylistItemFields,
    ) -> Result<PlaylistItemId, PersistenceError> {
        Ok(0)
    }

    async fn update_playlist_item(
        &self,
        _room_id: RoomId,
        _item: &PlaylistItem,
    ) -> Result<(), PersistenceError> {
        Ok(())
    }

    async fn remove_playlist_item(
        &self,
        _room_id: RoomId,
        _item_id: PlaylistItemId,
    ) -> Result<(), PersistenceError> {
        Ok(())
    }

    async fn mark_playlist_item_played(
        &self,
        _room_id: RoomId,
        _item_id: PlaylistItemId,
    ) -> Result<(), PersistenceError> {
        Ok(())
    }

    async fn get_all_playlist_items(&self, _room_id: RoomId) -> Result<Vec<PlaylistItem>, PersistenceError> {
        Ok(Vec::new())
    }

    async fn get_beatmap_checksum(&self, beatmap_id: u64) -> Result<Option<String>, PersistenceError> {
        Ok(self.beatmap_checksums.lock().await.get(&beatmap_id).cloned())
    }

    async fn is_user_restricted(&self, user_id: UserId) -> Result<bool, PersistenceError> {
        Ok(self.restricted.lock().await.contains(&user_id))
    }

    async fn is_user_blocked(&self, owner_id: UserId, target_id: UserId) -> Result<bool, PersistenceError> {
        Ok(self.blocks.lock().await.contains(&(owner_id, target_id)))
    }

    async fn user_blocks_pms(&self, user_id: UserId) -> Result<bool, PersistenceError> {
        Ok(self.pm_blockers.lock().await.contains(&user_id))
    }
}

/// Legality checks delegated to an external rules library. A real
/// implementation would consult ruleset metadata; this permissive default
/// accepts everything so the coordinator can be exercised without one.
#[async_trait]
pub trait RulesetRules: Send + Sync {
    async fn is_legal_ruleset(&self, ruleset_id: u32) -> bool;
    async fn mods_are_compatible(
        &self,
        required: &[tempo_core::user::ModEntry],
        allowed: &[tempo_core::user::ModEntry],
    ) -> bool;
}

pub struct PermissiveRulesetRules;

#[async_trait]
impl RulesetRules for PermissiveRulesetRules {
    async fn is_legal_ruleset(&self, _ruleset_id: u32) -> bool {
        true
    }

    async fn mods_are_compatible(
        &self,
        _required: &[tempo_core::user::ModEntry],
        _allowed: &[tempo_core::user::ModEntry],
    ) -> bool {
        true
    }
}

/// Unused for now that `QueueMode` isn't itself persisted separately —
/// kept so call sites can name the type without reaching into tempo_core
/// directly for this one re-export.
pub type PersistedQueueMode = QueueMode;

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> RoomSettings {
        RoomSettings {
            name: "room".to_string(),
            password: None,
            match_type: tempo_core::match_type::MatchTypeKind::HeadToHead,
            queue_mode: QueueMode::HostOnly,
            auto_start_duration: None,
        }
    }

    #[tokio::test]
    async fn get_room_requires_seeding() {
        let persistence = InMemoryPersistence::new();
        assert!(matches!(
            persistence.get_room(1).await,
            Err(PersistenceError::RoomNotFound)
        ));
        persistence
            .seed_room(
                1,
                PersistedRoom {
                    settings: settings(),
                    host_user_id: 1,
                },
            )
            .await;
        assert!(persistence.get_room(1).await.is_ok());
    }

    #[tokio::test]
    async fn restricted_users_are_reported() {
        let persistence = InMemoryPersistence::new();
        assert!(!persistence.is_user_restricted(1).await.unwrap());
        persistence.seed_restricted_user(1).await;
        assert!(persistence.is_user_restricted(1).await.unwrap());
    }

    #[tokio::test]
    async fn blocks_are_directional() {
        let persistence = InMemoryPersistence::new();
        persistence.seed_block(1, 2).await;
        assert!(persistence.is_user_blocked(1, 2).await.unwrap());
        assert!(!persistence.is_user_blocked(2, 1).await.unwrap());
    }
}
