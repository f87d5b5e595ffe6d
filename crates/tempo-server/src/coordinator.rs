//! The Room Coordinator: the single entry point every hub
//! message and connection-lifecycle event is funneled through. Holds the
//! two `EntityStore`s, delegates the actual state machine work to
//! `tempo_core::room::Room`, and is the only place that talks to
//! persistence, the ruleset rules adapter, the broadcaster, and the
//! countdown scheduler together.
//!
//! Canonical lock order: a connection's `ConnectionState` is
//! acquired before its room, everywhere. Following this consistently is
//! what keeps two coordinator calls for the same user from deadlocking.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;

use tempo_core::error::CoordinatorError;
use tempo_core::ids::{ConnectionId, HubKind, PlaylistItemId, RoomId, TokenId, UserId};
use tempo_core::match_type::MatchTypeKind;
use tempo_core::net::messages::{MatchRequestKind, ServerMessage};
use tempo_core::playlist::{PlaylistItemFields, QueueMode};
use tempo_core::room::{Room, RoomSettings, RoomSnapshot, RoomState};
use tempo_core::user::{BeatmapAvailability, ModEntry, RoomUserState};
use tempo_core::countdown::{CountdownDescriptor, CountdownKind};

use crate::broadcast::{BroadcastGroup, RoomBroadcaster};
use crate::connection::ConnectionState;
use crate::countdown::CountdownScheduler;
use crate::entity_store::EntityStore;
use crate::persistence::{Persistence, RulesetRules};

pub struct RoomCoordinator {
    rooms: EntityStore<Room>,
    connections: EntityStore<ConnectionState>,
    persistence: Arc<dyn Persistence>,
    broadcaster: Arc<dyn RoomBroadcaster>,
    rules: Arc<dyn RulesetRules>,
    countdowns: Arc<CountdownScheduler>,
    last_activity: Mutex<HashMap<RoomId, Instant>>,
}

impl RoomCoordinator {
    pub fn new(
        persistence: Arc<dyn Persistence>,
        broadcaster: Arc<dyn RoomBroadcaster>,
        rules: Arc<dyn RulesetRules>,
    ) -> Arc<Self> {
        Arc::new(Self {
            last_activity: Mutex::new(HashMap::new()),
            rooms: EntityStore::new(),
            connections: EntityStore::new(),
            persistence,
            broadcaster,
            rules,
            countdowns: Arc::new(CountdownScheduler::new()),
        })
    }

    pub async fn room_count(&self) -> usize {
        self.rooms.len().await
    }

    pub async fn room_snapshot(&self, room_id: RoomId) -> Result<RoomSnapshot, CoordinatorError> {
        let room = self.rooms.acquire_existing(room_id).await?;
        Ok(room.snapshot(Instant::now()))
    }

    pub async fn connection_count(&self) -> usize {
        self.connections.len().await
    }

    async fn touch_activity(&self, room_id: RoomId) {
        self.last_activity.lock().await.insert(room_id, Instant::now());
    }

    /// Destroy every room with no recorded activity inside `idle_timeout`
    /// (ambient expansion: rooms are normally destroyed the instant they
    /// empty out in `leave_room`, so anything caught here is a room whose
    /// members have stopped interacting with it without ever leaving).
    pub async fn evict_idle_rooms(self: &Arc<Self>, idle_timeout: Duration) -> usize {
        let cutoff = Instant::now().checked_sub(idle_timeout).unwrap_or_else(Instant::now);
        let stale: Vec<RoomId> = {
            let activity = self.last_activity.lock().await;
            activity.iter().filter(|(_, &t)| t < cutoff).map(|(&id, _)| id).collect()
        };

        let mut reaped = 0;
        for room_id in stale {
            if self.rooms.acquire_existing(room_id).await.is_ok() {
                self.countdowns.cancel(room_id).await;
                self.broadcaster
                    .send_to_room(room_id, &ServerMessage::DisconnectRequested)
                    .await;
                if let Err(e) = self.persistence.end_match(room_id).await {
                    tracing::warn!(room_id, error = %e, "failed to end match on idle eviction");
                }
                self.rooms.destroy(room_id).await;
                reaped += 1;
            }
            self.last_activity.lock().await.remove(&room_id);
        }
        reaped
    }

    // ---- connection limiter ----------------------------

    /// Record a new connection for `user_id`/`hub`, creating the tracked
    /// `ConnectionState` on first contact. Returns the connection id it
    /// superseded, if any — the hub handler must push that connection a
    /// `DisconnectRequested` before registering the new sender.
    pub async fn connect(
        &self,
        user_id: UserId,
        token_id: TokenId,
        hub: HubKind,
        connection_id: ConnectionId,
    ) -> Result<Option<ConnectionId>, CoordinatorError> {
        let mut state = self
            .connections
            .acquire(user_id, || ConnectionState::new(token_id.clone()))
            .await?;
        if state.token_id != token_id {
            // A fresh client instance reconnecting under the same user id;
            // room membership carries over rather than being silently lost.
            state.token_id = token_id;
        }
        Ok(state.supersede(hub, connection_id))
    }

    pub async fn validate_connection(
        &self,
        user_id: UserId,
        token_id: &TokenId,
        hub: HubKind,
        connection_id: ConnectionId,
    ) -> Result<(), CoordinatorError> {
        let state = self.connections.acquire_existing(user_id).await?;
        if &state.token_id != token_id || state.connection_for(hub) != Some(connection_id) {
            return Err(CoordinatorError::StaleConnection);
        }
        Ok(())
    }

    /// A hub connection has torn down. Only once every tracked connection
    /// for this user is gone do we destroy the `ConnectionState` and, if the
    /// user was in a room, leave it — a user who still has e.g. a spectator
    /// connection open stays tracked.
    pub async fn disconnect(self: &Arc<Self>, user_id: UserId, hub: HubKind, connection_id: ConnectionId) {
        let room_id = {
            let mut state = match self.connections.acquire_existing(user_id).await {
                Ok(state) => state,
                Err(_) => return,
            };
            state.clear_if_current(hub, connection_id);
            if state.has_any_connection() {
                return;
            }
            state.room_id
        };
        self.connections.destroy(user_id).await;
        if let Some(room_id) = room_id {
            self.leave_room(room_id, user_id).await;
        }
    }

    // ---- membership --------------------------------------------------

    /// Join a room, bootstrapping it from persistence on first contact
    /// (`JoinRoom`). `EntityStore::acquire`'s creation closure is
    /// synchronous and infallible, so a brand new entry is seeded with
    /// placeholder settings and swapped for the real ones once persistence
    /// confirms the requester is the room's host — the only caller allowed
    /// to originate a room.
    pub async fn join_room(
        self: &Arc<Self>,
        room_id: RoomId,
        user_id: UserId,
        password: Option<String>,
    ) -> Result<RoomSnapshot, CoordinatorError> {
        let mut conn = self.connections.acquire_existing(user_id).await?;
        if conn.room_id.is_some() {
            return Err(CoordinatorError::InvalidState(
                "already joined a room".to_string(),
            ));
        }

        let mut room = self
            .rooms
            .acquire(room_id, || Room::new(room_id, placeholder_settings()))
            .await?;
        let newly_created = room.users().is_empty();

        if newly_created {
            let persisted = match self.persistence.get_room(room_id).await {
                Ok(persisted) => persisted,
                Err(_) => {
                    drop(room);
                    self.rooms.destroy(room_id).await;
                    return Err(CoordinatorError::InvalidState("room not found".to_string()));
                },
            };
            if persisted.host_user_id != user_id {
                drop(room);
                self.rooms.destroy(room_id).await;
                return Err(CoordinatorError::NotHost);
            }
            *room = Room::new(room_id, persisted.settings);
        }

        if let Err(err) = room.join(user_id, password.as_deref()) {
            if newly_created {
                drop(room);
                let _ = self.persistence.end_match(room_id).await;
                self.rooms.destroy(room_id).await;
            }
            return Err(err);
        }

        conn.room_id = Some(room_id);
        drop(conn);
        self.touch_activity(room_id).await;

        if let Err(e) = self.persistence.mark_room_active(room_id).await {
            tracing::warn!(room_id, error = %e, "failed to mark room active");
        }
        if let Err(e) = self.persistence.add_participant(room_id, user_id).await {
            tracing::warn!(room_id, user_id, error = %e, "failed to persist participant");
        }

        self.broadcaster
            .add_to_group(room_id, user_id, BroadcastGroup::Control)
            .await;
        let state = room.find_user(user_id).map(|u| u.state).unwrap_or(RoomUserState::Idle);
        self.sync_gameplay_membership(room_id, user_id, state).await;
        self.broadcaster
            .send_to_room(room_id, &ServerMessage::UserJoined { user_id })
            .await;

        Ok(room.snapshot(Instant::now()))
    }

    /// Remove a user from their room — leave or the tail end of a kick. A
    /// no-op if the room or membership is already gone (e.g. a disconnect
    /// racing a kick).
    pub async fn leave_room(self: &Arc<Self>, room_id: RoomId, user_id: UserId) {
        if let Ok(mut conn) = self.connections.acquire_existing(user_id).await {
            if conn.room_id == Some(room_id) {
                conn.room_id = None;
            }
        }

        let mut room = match self.rooms.acquire_existing(room_id).await {
            Ok(room) => room,
            Err(_) => return,
        };
        if room.find_user(user_id).is_none() {
            return;
        }
        let was_host = room.is_host(user_id);
        room.remove_user(user_id);

        self.broadcaster
            .remove_from_group(room_id, user_id, BroadcastGroup::Control)
            .await;
        self.broadcaster
            .remove_from_group(room_id, user_id, BroadcastGroup::Gameplay)
            .await;
        self.broadcaster
            .send_to_room(room_id, &ServerMessage::UserLeft { user_id })
            .await;

        if let Err(e) = self.persistence.remove_participant(room_id, user_id).await {
            tracing::warn!(room_id, user_id, error = %e, "failed to persist participant removal");
        }

        if was_host {
            if let Some(new_host_id) = room.host_user_id() {
                if let Err(e) = self.persistence.update_room_host(room_id, new_host_id).await {
                    tracing::warn!(room_id, error = %e, "failed to persist host transfer");
                }
                self.broadcaster
                    .send_to_room(room_id, &ServerMessage::HostChanged { user_id: new_host_id })
                    .await;
            }
        }

        if room.users().is_empty() {
            self.countdowns.cancel(room_id).await;
            if let Err(e) = self.persistence.end_match(room_id).await {
                tracing::warn!(room_id, error = %e, "failed to end match on room close");
            }
            drop(room);
            self.rooms.destroy(room_id).await;
            self.last_activity.lock().await.remove(&room_id);
            return;
        }

        self.recompute_and_broadcast(room_id, &mut room).await;
    }

    /// Host-only: notify the target before removing them, so the
    /// `UserKicked` push still reaches the connection about to be dropped
    /// from the room's broadcast group (`KickUser`).
    pub async fn kick_user(
        self: &Arc<Self>,
        room_id: RoomId,
        requester_id: UserId,
        target_user_id: UserId,
    ) -> Result<(), CoordinatorError> {
        {
            let room = self.rooms.acquire_existing(room_id).await?;
            if !room.is_host(requester_id) {
                return Err(CoordinatorError::NotHost);
            }
            if room.find_user(target_user_id).is_none() {
                return Err(CoordinatorError::NotJoinedRoom);
            }
        }
        self.broadcaster
            .send_to_user(target_user_id, &ServerMessage::UserKicked { user_id: target_user_id })
            .await;
        self.leave_room(room_id, target_user_id).await;
        Ok(())
    }

    // ---- gameplay state -----------------------------------------------

    pub async fn change_state(
        self: &Arc<Self>,
        room_id: RoomId,
        user_id: UserId,
        to: RoomUserState,
    ) -> Result<(), CoordinatorError> {
        let mut room = self.rooms.acquire_existing(room_id).await?;
        let applied = room.change_user_state(user_id, to)?;
        if !applied {
            return Ok(());
        }
        self.sync_gameplay_membership(room_id, user_id, to).await;
        self.broadcaster
            .send_to_room(room_id, &ServerMessage::UserStateChanged { user_id, state: to })
            .await;
        if to == RoomUserState::Spectating && room.state() != RoomState::Open {
            self.broadcaster
                .send_to_user(user_id, &ServerMessage::LoadRequested)
                .await;
        }
        self.recompute_and_broadcast(room_id, &mut room).await;
        Ok(())
    }

    pub async fn start_match(
        self: &Arc<Self>,
        room_id: RoomId,
        requester_id: UserId,
    ) -> Result<(), CoordinatorError> {
        let mut room = self.rooms.acquire_existing(room_id).await?;
        let ids = room.start_match(requester_id)?;
        self.countdowns.cancel(room_id).await;
        for user_id in &ids {
            self.broadcaster
                .send_to_user(
                    *user_id,
                    &ServerMessage::UserStateChanged { user_id: *user_id, state: RoomUserState::WaitingForLoad },
                )
                .await;
        }
        self.broadcaster
            .send_to_gameplay_group(room_id, &ServerMessage::LoadRequested)
            .await;
        self.broadcaster
            .send_to_room(room_id, &ServerMessage::RoomStateChanged { state: room.state() })
            .await;
        self.recompute_and_broadcast(room_id, &mut room).await;
        Ok(())
    }

    pub async fn abort_gameplay(
        self: &Arc<Self>,
        room_id: RoomId,
        requester_id: UserId,
    ) -> Result<(), CoordinatorError> {
        let mut room = self.rooms.acquire_existing(room_id).await?;
        let ids = room.abort_gameplay(requester_id)?;
        self.countdowns.cancel(room_id).await;
        room.set_countdown(None);
        for user_id in &ids {
            self.broadcaster
                .send_to_user(
                    *user_id,
                    &ServerMessage::UserStateChanged { user_id: *user_id, state: RoomUserState::Idle },
                )
                .await;
            self.sync_gameplay_membership(room_id, *user_id, RoomUserState::Idle).await;
        }
        self.broadcaster
            .send_to_room(room_id, &ServerMessage::RoomStateChanged { state: room.state() })
            .await;
        self.recompute_and_broadcast(room_id, &mut room).await;
        Ok(())
    }

    pub async fn transfer_host(
        &self,
        room_id: RoomId,
        requester_id: UserId,
        new_host_id: UserId,
    ) -> Result<(), CoordinatorError> {
        let mut room = self.rooms.acquire_existing(room_id).await?;
        room.transfer_host(requester_id, new_host_id)?;
        if let Err(e) = self.persistence.update_room_host(room_id, new_host_id).await {
            tracing::warn!(room_id, error = %e, "failed to persist host transfer");
        }
        self.broadcaster
            .send_to_room(room_id, &ServerMessage::HostChanged { user_id: new_host_id })
            .await;
        Ok(())
    }

    pub async fn change_settings(
        self: &Arc<Self>,
        room_id: RoomId,
        requester_id: UserId,
        settings: RoomSettings,
    ) -> Result<(), CoordinatorError> {
        let mut room = self.rooms.acquire_existing(room_id).await?;
        if !room.is_host(requester_id) {
            return Err(CoordinatorError::NotHost);
        }
        if settings == room.settings {
            return Ok(());
        }
        if room.state() != RoomState::Open {
            return Err(CoordinatorError::InvalidState(
                "settings may only change while the room is open".to_string(),
            ));
        }
        room.change_settings(requester_id, settings.clone())?;

        let ready_ids: Vec<UserId> = room
            .users()
            .iter()
            .filter(|u| u.state == RoomUserState::Ready)
            .map(|u| u.user_id)
            .collect();
        for user_id in &ready_ids {
            room.force_user_state(*user_id, RoomUserState::Idle);
        }

        if let Err(e) = self.persistence.update_room_settings(room_id, &settings).await {
            tracing::warn!(room_id, error = %e, "failed to persist settings change");
        }
        for user_id in &ready_ids {
            self.broadcaster
                .send_to_user(
                    *user_id,
                    &ServerMessage::UserStateChanged { user_id: *user_id, state: RoomUserState::Idle },
                )
                .await;
        }

        let allowed_mods = room
            .playlist()
            .current_item()
            .map(|item| item.allowed_mods.clone())
            .unwrap_or_default();
        let user_ids: Vec<UserId> = room.users().iter().map(|u| u.user_id).collect();
        for user_id in user_ids {
            let mods = room
                .users()
                .iter()
                .find(|u| u.user_id == user_id)
                .map(|u| u.mods.clone())
                .unwrap_or_default();
            if mods.is_empty() {
                continue;
            }
            if !self.rules.mods_are_compatible(&mods, &allowed_mods).await {
                room.change_user_mods(user_id, Vec::new())?;
                self.broadcaster
                    .send_to_room(room_id, &ServerMessage::UserModsChanged { user_id, mods: Vec::new() })
                    .await;
            }
        }

        self.broadcaster
            .send_to_room(room_id, &ServerMessage::SettingsChanged { settings })
            .await;
        self.recompute_and_broadcast(room_id, &mut room).await;
        Ok(())
    }

    pub async fn change_user_mods(
        &self,
        room_id: RoomId,
        user_id: UserId,
        mods: Vec<ModEntry>,
    ) -> Result<(), CoordinatorError> {
        let mut room = self.rooms.acquire_existing(room_id).await?;
        let allowed = room
            .playlist()
            .current_item()
            .map(|item| item.allowed_mods.clone())
            .unwrap_or_default();
        if !self.rules.mods_are_compatible(&mods, &allowed).await {
            return Err(CoordinatorError::InvalidState(
                "mods are not compatible with the current item".to_string(),
            ));
        }
        room.change_user_mods(user_id, mods.clone())?;
        self.broadcaster
            .send_to_room(room_id, &ServerMessage::UserModsChanged { user_id, mods })
            .await;
        Ok(())
    }

    pub async fn change_beatmap_availability(
        &self,
        room_id: RoomId,
        user_id: UserId,
        availability: BeatmapAvailability,
    ) -> Result<(), CoordinatorError> {
        let mut room = self.rooms.acquire_existing(room_id).await?;
        room.change_beatmap_availability(user_id, availability)?;
        self.broadcaster
            .send_to_room(room_id, &ServerMessage::UserBeatmapAvailabilityChanged { user_id, availability })
            .await;
        Ok(())
    }

    // ---- match requests: countdown control + match-type strategy ------

    pub async fn send_match_request(
        self: &Arc<Self>,
        room_id: RoomId,
        user_id: UserId,
        request: MatchRequestKind,
    ) -> Result<(), CoordinatorError> {
        match request {
            MatchRequestKind::StartCountdown { duration_secs } => {
                self.start_countdown_request(room_id, user_id, duration_secs).await
            },
            MatchRequestKind::StopCountdown => self.stop_countdown_request(room_id, user_id).await,
            MatchRequestKind::MatchType(inner) => {
                let mut room = self.rooms.acquire_existing(room_id).await?;
                room.match_type_request(user_id, inner)?;
                self.broadcaster
                    .send_to_room(room_id, &ServerMessage::RoomState { room: room.snapshot(Instant::now()) })
                    .await;
                Ok(())
            },
        }
    }

    async fn start_countdown_request(
        self: &Arc<Self>,
        room_id: RoomId,
        requester_id: UserId,
        duration_secs: u64,
    ) -> Result<(), CoordinatorError> {
        let mut room = self.rooms.acquire_existing(room_id).await?;
        if !room.is_host(requester_id) {
            return Err(CoordinatorError::NotHost);
        }
        if room.state() != RoomState::Open {
            return Err(CoordinatorError::InvalidState(
                "a countdown can only start while the room is open".to_string(),
            ));
        }
        if room.settings.auto_start_duration.is_some() {
            return Err(CoordinatorError::InvalidState(
                "auto-start is enabled for this room".to_string(),
            ));
        }
        self.begin_countdown(
            room_id,
            &mut room,
            CountdownKind::UserInitiated,
            Duration::from_secs(duration_secs),
        )
        .await;
        Ok(())
    }

    async fn stop_countdown_request(&self, room_id: RoomId, requester_id: UserId) -> Result<(), CoordinatorError> {
        let mut room = self.rooms.acquire_existing(room_id).await?;
        if !room.is_host(requester_id) {
            return Err(CoordinatorError::NotHost);
        }
        let cancellable = room.countdown().map(|c| c.kind.is_cancellable()).unwrap_or(false);
        if !cancellable {
            return Err(CoordinatorError::InvalidState(
                "no cancellable countdown is running".to_string(),
            ));
        }
        self.countdowns.cancel(room_id).await;
        room.set_countdown(None);
        self.broadcaster
            .send_to_room(room_id, &ServerMessage::CountdownStopped)
            .await;
        Ok(())
    }

    async fn begin_countdown(self: &Arc<Self>, room_id: RoomId, room: &mut Room, kind: CountdownKind, duration: Duration) {
        room.set_countdown(Some(CountdownDescriptor::start(kind, duration, Instant::now())));
        self.broadcaster
            .send_to_room(room_id, &ServerMessage::CountdownStarted { duration_secs: duration.as_secs() })
            .await;

        let coordinator = Arc::clone(self);
        self.countdowns
            .start(room_id, duration, move || {
                Box::pin(async move { coordinator.on_countdown_expired(room_id).await })
            })
            .await;
    }

    /// Runs when the countdown scheduler's timer wins the race. Re-acquires
    /// the room lock independently of whatever called `begin_countdown` —
    /// by the time this runs, that caller is long gone.
    async fn on_countdown_expired(self: Arc<Self>, room_id: RoomId) {
        let Ok(mut room) = self.rooms.acquire_existing(room_id).await else {
            return;
        };
        room.set_countdown(None);
        if let Some(ids) = room.internal_start() {
            for user_id in &ids {
                self.broadcaster
                    .send_to_user(
                        *user_id,
                        &ServerMessage::UserStateChanged { user_id: *user_id, state: RoomUserState::WaitingForLoad },
                    )
                    .await;
            }
            self.broadcaster
                .send_to_gameplay_group(room_id, &ServerMessage::LoadRequested)
                .await;
            self.broadcaster
                .send_to_room(room_id, &ServerMessage::RoomStateChanged { state: room.state() })
                .await;
        }
        self.recompute_and_broadcast(room_id, &mut room).await;
    }

    // ---- playlist ------------------------------------------

    pub async fn add_playlist_item(
        self: &Arc<Self>,
        room_id: RoomId,
        user_id: UserId,
        fields: PlaylistItemFields,
    ) -> Result<PlaylistItemId, CoordinatorError> {
        self.validate_playlist_fields(&fields).await?;
        let mut room = self.rooms.acquire_existing(room_id).await?;
        let is_host = room.is_host(user_id);
        let item_id = room.playlist_mut().add_item(user_id, is_host, fields)?;
        let item = room
            .playlist()
            .items()
            .iter()
            .find(|i| i.id == item_id)
            .cloned()
            .expect("item was just inserted");

        if let Err(e) = self
            .persistence
            .add_playlist_item(
                room_id,
                user_id,
                PlaylistItemFields {
                    beatmap_id: item.beatmap_id,
                    ruleset_id: item.ruleset_id,
                    required_mods: item.required_mods.clone(),
                    allowed_mods: item.allowed_mods.clone(),
                },
            )
            .await
        {
            tracing::warn!(room_id, error = %e, "failed to persist playlist item");
        }

        self.broadcaster
            .send_to_room(room_id, &ServerMessage::PlaylistItemAdded { item })
            .await;
        self.recompute_and_broadcast(room_id, &mut room).await;
        Ok(item_id)
    }

    pub async fn edit_playlist_item(
        self: &Arc<Self>,
        room_id: RoomId,
        user_id: UserId,
        item_id: PlaylistItemId,
        fields: PlaylistItemFields,
    ) -> Result<(), CoordinatorError> {
        self.validate_playlist_fields(&fields).await?;
        let mut room = self.rooms.acquire_existing(room_id).await?;
        let is_host = room.is_host(user_id);
        room.playlist_mut().edit_item(item_id, user_id, is_host, fields)?;
        let item = room
            .playlist()
            .items()
            .iter()
            .find(|i| i.id == item_id)
            .cloned()
            .expect("item was just edited");

        if let Err(e) = self.persistence.update_playlist_item(room_id, &item).await {
            tracing::warn!(room_id, error = %e, "failed to persist playlist item edit");
        }

        self.broadcaster
            .send_to_room(room_id, &ServerMessage::PlaylistItemChanged { item })
            .await;
        self.recompute_and_broadcast(room_id, &mut room).await;
        Ok(())
    }

    pub async fn remove_playlist_item(
        self: &Arc<Self>,
        room_id: RoomId,
        user_id: UserId,
        item_id: PlaylistItemId,
    ) -> Result<(), CoordinatorError> {
        let mut room = self.rooms.acquire_existing(room_id).await?;
        let is_host = room.is_host(user_id);
        let before_current = room.playlist().current_item().map(|i| i.id);
        room.playlist_mut().remove_item(item_id, user_id, is_host)?;

        if let Err(e) = self.persistence.remove_playlist_item(room_id, item_id).await {
            tracing::warn!(room_id, error = %e, "failed to persist playlist item removal");
        }
        self.broadcaster
            .send_to_room(room_id, &ServerMessage::PlaylistItemRemoved { item_id })
            .await;

        // Removing the current item can leave ready users readied up
        // against a beatmap that's no longer being served next.
        let after_current = room.playlist().current_item().map(|i| i.id);
        if before_current == Some(item_id) && before_current != after_current {
            let ready_ids: Vec<UserId> = room
                .users()
                .iter()
                .filter(|u| u.state == RoomUserState::Ready)
                .map(|u| u.user_id)
                .collect();
            for id in &ready_ids {
                room.force_user_state(*id, RoomUserState::Idle);
                self.broadcaster
                    .send_to_user(*id, &ServerMessage::UserStateChanged { user_id: *id, state: RoomUserState::Idle })
                    .await;
            }
        }

        self.recompute_and_broadcast(room_id, &mut room).await;
        Ok(())
    }

    async fn validate_playlist_fields(&self, fields: &PlaylistItemFields) -> Result<(), CoordinatorError> {
        if !self.rules.is_legal_ruleset(fields.ruleset_id).await {
            return Err(CoordinatorError::InvalidState(
                "ruleset is not legal for multiplayer".to_string(),
            ));
        }
        if !self.rules.mods_are_compatible(&fields.required_mods, &fields.allowed_mods).await {
            return Err(CoordinatorError::InvalidState(
                "required and allowed mods are incompatible".to_string(),
            ));
        }
        match self.persistence.get_beatmap_checksum(fields.beatmap_id).await {
            Ok(Some(_)) => Ok(()),
            Ok(None) => Err(CoordinatorError::InvalidState("beatmap does not exist".to_string())),
            Err(_) => Err(CoordinatorError::InvalidState("beatmap lookup failed".to_string())),
        }
    }

    // ---- invites ---------------------------------------------------------

    pub async fn invite_player(
        &self,
        room_id: RoomId,
        from_user_id: UserId,
        target_user_id: UserId,
    ) -> Result<(), CoordinatorError> {
        if self
            .persistence
            .is_user_blocked(target_user_id, from_user_id)
            .await
            .unwrap_or(false)
        {
            return Err(CoordinatorError::UserBlocked);
        }
        if self.persistence.user_blocks_pms(target_user_id).await.unwrap_or(false) {
            return Err(CoordinatorError::UserBlocksPMs);
        }
        self.broadcaster
            .send_to_user(target_user_id, &ServerMessage::Invited { from_user_id, room_id })
            .await;
        Ok(())
    }

    // ---- shared lifecycle plumbing --------------------------------------

    async fn sync_gameplay_membership(&self, room_id: RoomId, user_id: UserId, state: RoomUserState) {
        if state.is_in_gameplay_group() {
            self.broadcaster.add_to_group(room_id, user_id, BroadcastGroup::Gameplay).await;
        } else {
            self.broadcaster.remove_from_group(room_id, user_id, BroadcastGroup::Gameplay).await;
        }
    }

    /// Run the §4.6 recomputation pass and broadcast everything it found,
    /// starting or stopping the auto-start countdown to match. Call after
    /// any operation that could have moved the room between phases.
    async fn recompute_and_broadcast(self: &Arc<Self>, room_id: RoomId, room: &mut Room) {
        self.touch_activity(room_id).await;
        let before_state = room.state();
        let effects = room.advance_lifecycle();

        for user_id in &effects.advanced_to_playing {
            self.broadcaster
                .send_to_user(
                    *user_id,
                    &ServerMessage::UserStateChanged { user_id: *user_id, state: RoomUserState::Playing },
                )
                .await;
            self.sync_gameplay_membership(room_id, *user_id, RoomUserState::Playing).await;
        }
        if !effects.advanced_to_playing.is_empty() {
            self.broadcaster
                .send_to_room(room_id, &ServerMessage::MatchStarted { user_ids: effects.advanced_to_playing.clone() })
                .await;
        }

        if effects.load_abandoned {
            tracing::debug!(room_id, "every loading user left before any finished loading");
        }

        if let Some(outcome) = effects.finished {
            self.broadcaster.send_to_room(room_id, &ServerMessage::ResultsReady).await;
            if let Err(e) = self.persistence.mark_playlist_item_played(room_id, outcome.expired_item_id).await {
                tracing::warn!(room_id, error = %e, "failed to persist playlist item completion");
            }
        }

        if room.state() != before_state {
            self.broadcaster
                .send_to_room(room_id, &ServerMessage::RoomStateChanged { state: room.state() })
                .await;
        }

        match effects.auto_start {
            Some(true) => {
                if !self.countdowns.is_active(room_id).await {
                    let duration = room.settings.auto_start_duration.unwrap_or_default();
                    self.begin_countdown(room_id, room, CountdownKind::AutoStart, duration).await;
                }
            },
            Some(false) => {
                if matches!(room.countdown().map(|c| c.kind), Some(CountdownKind::AutoStart)) {
                    self.countdowns.cancel(room_id).await;
                    room.set_countdown(None);
                    self.broadcaster.send_to_room(room_id, &ServerMessage::CountdownStopped).await;
                }
            },
            None => {},
        }
    }
}

fn placeholder_settings() -> RoomSettings {
    RoomSettings {
        name: String::new(),
        password: None,
        match_type: MatchTypeKind::HeadToHead,
        queue_mode: QueueMode::HostOnly,
        auto_start_duration: None,
    }
}
