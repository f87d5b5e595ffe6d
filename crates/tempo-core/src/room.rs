//! The room aggregate: settings, membership, overall
//! gameplay state, and the playlist queue it drives.

use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::countdown::{CountdownDescriptor, CountdownKind};
use crate::error::CoordinatorError;
use crate::ids::{RoomId, UserId};
use crate::match_type::{MatchTypeKind, MatchTypeRequest};
use crate::playlist::{PlaylistQueue, QueueMode};
use crate::user::{RoomUser, RoomUserState, TransitionOutcome};

/// Host-controlled settings for a room.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoomSettings {
    pub name: String,
    pub password: Option<String>,
    pub match_type: MatchTypeKind,
    pub queue_mode: QueueMode,
    /// Countdown started automatically once every joined user is Ready;
    /// `None` disables auto-start.
    pub auto_start_duration: Option<Duration>,
}

/// The room's aggregate gameplay phase, recomputed after every user state
/// change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RoomState {
    /// No one is mid-match; users may freely join, ready up, and leave.
    Open,
    /// A match has been started and at least one user hasn't finished
    /// loading.
    WaitingForLoad,
    /// Every loading user has finished loading; gameplay is in progress.
    Playing,
}

/// What a §4.6 recomputation pass found, for the coordinator to broadcast.
/// Every field defaults to "nothing happened" so callers can ignore the
/// parts that don't apply.
#[derive(Debug, Clone, Default)]
pub struct LifecycleEffects {
    /// Users moved from `Loaded` to `Playing` as a batch; the coordinator
    /// broadcasts a `UserStateChanged` per id, then `MatchStarted`.
    pub advanced_to_playing: Vec<UserId>,
    /// Every loading user left before any of them finished loading; the
    /// match never started.
    pub load_abandoned: bool,
    /// The match just finished: fires `ResultsReady` and carries the
    /// playlist's next-item outcome.
    pub finished: Option<crate::playlist::FinishOutcome>,
    /// Whether an auto-start countdown should now be running. `None` when
    /// auto-start doesn't apply to this room.
    pub auto_start: Option<bool>,
}

/// A live room. Lives behind an `EntityStore` entry in the server crate;
/// this type itself holds no lock and does no I/O.
#[derive(Debug, Clone)]
pub struct Room {
    pub id: RoomId,
    pub settings: RoomSettings,
    users: Vec<RoomUser>,
    host_user_id: Option<UserId>,
    state: RoomState,
    playlist: PlaylistQueue,
    countdown: Option<CountdownDescriptor>,
}

/// Deep-copy, fully-owned view of a room for handing back to callers
/// without exposing the live aggregate or its lock.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoomSnapshot {
    pub id: RoomId,
    pub settings: RoomSettings,
    pub users: Vec<RoomUser>,
    pub host_user_id: Option<UserId>,
    pub state: RoomState,
    pub playlist: Vec<crate::playlist::PlaylistItem>,
    pub countdown_kind: Option<CountdownKind>,
    pub countdown_remaining: Option<Duration>,
}

impl Room {
    pub fn new(id: RoomId, settings: RoomSettings) -> Self {
        let queue_mode = settings.queue_mode;
        Self {
            id,
            settings,
            users: Vec::new(),
            host_user_id: None,
            state: RoomState::Open,
            playlist: PlaylistQueue::new(queue_mode),
            countdown: None,
        }
    }

    pub fn users(&self) -> &[RoomUser] {
        &self.users
    }

    pub fn host_user_id(&self) -> Option<UserId> {
        self.host_user_id
    }

    pub fn state(&self) -> RoomState {
        self.state
    }

    pub fn playlist(&self) -> &PlaylistQueue {
        &self.playlist
    }

    pub fn playlist_mut(&mut self) -> &mut PlaylistQueue {
        &mut self.playlist
    }

    pub fn countdown(&self) -> Option<&CountdownDescriptor> {
        self.countdown.as_ref()
    }

    pub fn set_countdown(&mut self, descriptor: Option<CountdownDescriptor>) {
        self.countdown = descriptor;
    }

    pub fn is_host(&self, user_id: UserId) -> bool {
        self.host_user_id == Some(user_id)
    }

    pub fn find_user(&self, user_id: UserId) -> Option<&RoomUser> {
        self.users.iter().find(|u| u.user_id == user_id)
    }

    fn find_user_mut(&mut self, user_id: UserId) -> Option<&mut RoomUser> {
        self.users.iter_mut().find(|u| u.user_id == user_id)
    }

    /// Join a room, validating the password if one is set. The first
    /// joiner becomes host.
    pub fn join(&mut self, user_id: UserId, password: Option<&str>) -> Result<(), CoordinatorError> {
        if self.users.iter().any(|u| u.user_id == user_id) {
            return Ok(());
        }
        if let Some(expected) = &self.settings.password {
            if password != Some(expected.as_str()) {
                return Err(CoordinatorError::InvalidPassword);
            }
        }
        self.users.push(RoomUser::new(user_id));
        if self.host_user_id.is_none() {
            self.host_user_id = Some(user_id);
        }
        self.settings.match_type.on_join(&mut self.users, user_id);
        Ok(())
    }

    /// Remove a user (leave or kick). Transfers host to the
    /// longest-tenured remaining user if the host left: join order is
    /// preserved in `users`, so the next host is simply the new first
    /// entry.
    pub fn remove_user(&mut self, user_id: UserId) {
        let was_host = self.host_user_id == Some(user_id);
        self.users.retain(|u| u.user_id != user_id);
        self.settings.match_type.on_leave(&mut self.users, user_id);
        if was_host {
            self.host_user_id = self.users.first().map(|u| u.user_id);
        }
        self.recompute_state();
    }

    pub fn transfer_host(&mut self, requester_id: UserId, new_host_id: UserId) -> Result<(), CoordinatorError> {
        if !self.is_host(requester_id) {
            return Err(CoordinatorError::NotHost);
        }
        if self.find_user(new_host_id).is_none() {
            return Err(CoordinatorError::InvalidState(
                "target user is not in this room".to_string(),
            ));
        }
        self.host_user_id = Some(new_host_id);
        Ok(())
    }

    pub fn change_settings(
        &mut self,
        requester_id: UserId,
        settings: RoomSettings,
    ) -> Result<(), CoordinatorError> {
        if !self.is_host(requester_id) {
            return Err(CoordinatorError::NotHost);
        }
        let queue_mode_changed = settings.queue_mode != self.settings.queue_mode;
        let match_type_changed = settings.match_type != self.settings.match_type;
        self.settings = settings;
        if queue_mode_changed {
            let mode = self.settings.queue_mode;
            self.playlist.re_derive_ordering(mode);
        }
        if match_type_changed {
            let match_type = self.settings.match_type.clone();
            let ids: Vec<UserId> = self.users.iter().map(|u| u.user_id).collect();
            for id in ids {
                match_type.on_join(&mut self.users, id);
            }
        }
        Ok(())
    }

    pub fn change_user_mods(
        &mut self,
        user_id: UserId,
        mods: Vec<crate::user::ModEntry>,
    ) -> Result<(), CoordinatorError> {
        let user = self
            .find_user_mut(user_id)
            .ok_or(CoordinatorError::NotJoinedRoom)?;
        user.mods = mods;
        Ok(())
    }

    pub fn change_beatmap_availability(
        &mut self,
        user_id: UserId,
        availability: crate::user::BeatmapAvailability,
    ) -> Result<(), CoordinatorError> {
        let user = self
            .find_user_mut(user_id)
            .ok_or(CoordinatorError::NotJoinedRoom)?;
        user.beatmap_availability = availability;
        Ok(())
    }

    pub fn match_type_request(
        &mut self,
        user_id: UserId,
        request: MatchTypeRequest,
    ) -> Result<(), CoordinatorError> {
        if self.find_user(user_id).is_none() {
            return Err(CoordinatorError::NotJoinedRoom);
        }
        let match_type = self.settings.match_type.clone();
        match_type.on_request(&mut self.users, user_id, request)
    }

    /// Apply a client-requested user state change, consulting the
    /// transition table. Returns `Ok(true)` if the change was
    /// applied and should broadcast, `Ok(false)` if it was a silent drop.
    pub fn change_user_state(
        &mut self,
        user_id: UserId,
        to: RoomUserState,
    ) -> Result<bool, CoordinatorError> {
        let current = self
            .find_user(user_id)
            .ok_or(CoordinatorError::NotJoinedRoom)?
            .state;

        if to == RoomUserState::Ready && self.playlist.current_item().is_none() {
            return Err(CoordinatorError::InvalidState(
                "no current playlist item to ready up against".to_string(),
            ));
        }

        match current.validate_client_transition(to) {
            TransitionOutcome::Rejected => Err(CoordinatorError::InvalidStateChange(format!(
                "{current:?} -> {to:?} is not a valid client transition"
            ))),
            TransitionOutcome::SilentDrop => Ok(false),
            TransitionOutcome::Allowed => {
                if current == to {
                    return Ok(false);
                }
                self.find_user_mut(user_id).unwrap().state = to;
                self.recompute_state();
                Ok(true)
            },
        }
    }

    /// Server-driven transition: applied directly, bypassing the client
    /// transition table (e.g. `StartMatch` driving every Ready user to
    /// `WaitingForLoad`).
    pub fn force_user_state(&mut self, user_id: UserId, to: RoomUserState) {
        if let Some(user) = self.find_user_mut(user_id) {
            user.state = to;
        }
        self.recompute_state();
    }

    /// Shared body of `StartMatch` and `internal_start`: every `Ready` user
    /// moves to `WaitingForLoad` (`StartMatch`). `None` if a
    /// precondition doesn't hold — the caller decides whether that's an
    /// error (client-requested) or an expected no-op (countdown racing
    /// ahead of a user backing out of Ready).
    fn begin_match(&mut self) -> Option<Vec<UserId>> {
        if self.state != RoomState::Open {
            return None;
        }
        if self.playlist.current_item().is_none() {
            return None;
        }
        let ready_ids: Vec<UserId> = self
            .users
            .iter()
            .filter(|u| u.state == RoomUserState::Ready)
            .map(|u| u.user_id)
            .collect();
        if ready_ids.is_empty() {
            return None;
        }
        for id in &ready_ids {
            self.force_user_state(*id, RoomUserState::WaitingForLoad);
        }
        self.countdown = None;
        Some(ready_ids)
    }

    /// Client-requested match start: host only, and the host must itself be
    /// Ready or Spectating — a host sitting Idle cannot start the match off
    /// another user's Ready.
    pub fn start_match(&mut self, requester_id: UserId) -> Result<Vec<UserId>, CoordinatorError> {
        if !self.is_host(requester_id) {
            return Err(CoordinatorError::NotHost);
        }
        let host_ready_or_spectating = self
            .find_user(requester_id)
            .is_some_and(|u| matches!(u.state, RoomUserState::Ready | RoomUserState::Spectating));
        if !host_ready_or_spectating {
            return Err(CoordinatorError::InvalidState(
                "host must be ready or spectating to start the match".to_string(),
            ));
        }
        self.begin_match().ok_or_else(|| {
            CoordinatorError::InvalidState(
                "room is not open, has no current item, or no user is ready".to_string(),
            )
        })
    }

    /// Server-driven match start, invoked when a countdown completes (spec
    /// §4.7 `InternalStart`). `None` if the preconditions no longer hold.
    pub fn internal_start(&mut self) -> Option<Vec<UserId>> {
        self.begin_match()
    }

    /// Abort the caller's own in-progress match (`AbortGameplay`). Only the
    /// caller returns to Idle — other users mid-gameplay are untouched, so
    /// the room can stay `Playing` while one user bails out.
    pub fn abort_gameplay(&mut self, requester_id: UserId) -> Result<Vec<UserId>, CoordinatorError> {
        let in_gameplay = self
            .find_user(requester_id)
            .is_some_and(|u| u.state.is_gameplay_state());
        if !in_gameplay {
            return Err(CoordinatorError::InvalidState(
                "caller is not in a gameplay state".to_string(),
            ));
        }
        self.force_user_state(requester_id, RoomUserState::Idle);
        Ok(vec![requester_id])
    }

    /// Finish the current playlist item and advance the queue, rolling
    /// every FinishedPlay user into Results.
    pub fn finish_match(&mut self) -> Option<crate::playlist::FinishOutcome> {
        let affected: Vec<UserId> = self
            .users
            .iter()
            .filter(|u| u.state == RoomUserState::FinishedPlay)
            .map(|u| u.user_id)
            .collect();
        for id in affected {
            self.force_user_state(id, RoomUserState::Results);
        }
        let outcome = self.playlist.finish_current_item();
        if let Some(o) = &outcome {
            if o.current_item_changed {
                let ids: Vec<UserId> = self.users.iter().map(|u| u.user_id).collect();
                for id in ids {
                    if let Some(u) = self.find_user_mut(id) {
                        if u.state == RoomUserState::Ready {
                            u.state = RoomUserState::Idle;
                        }
                        u.mods.clear();
                    }
                }
            }
        }
        self.recompute_state();
        outcome
    }

    /// Recompute `state` from the aggregate of member states.
    /// A `Loaded` user keeps the room in `WaitingForLoad` — promoting a
    /// batch of loaded users to `Playing` is a distinct, broadcast-worthy
    /// step the coordinator drives via `advance_lifecycle`, not something
    /// that happens silently as a side effect of one user's transition.
    pub fn recompute_state(&mut self) {
        let any_waiting_or_loaded = self
            .users
            .iter()
            .any(|u| matches!(u.state, RoomUserState::WaitingForLoad | RoomUserState::Loaded));
        let any_playing = self.users.iter().any(|u| u.state == RoomUserState::Playing);
        self.state = if any_waiting_or_loaded {
            RoomState::WaitingForLoad
        } else if any_playing {
            RoomState::Playing
        } else {
            RoomState::Open
        };
    }

    /// Run the §4.6 single recomputation pass and report what the
    /// coordinator needs to broadcast. Called after every user-state or
    /// user-set change that could have moved the room between phases.
    pub fn advance_lifecycle(&mut self) -> LifecycleEffects {
        let mut effects = LifecycleEffects::default();

        match self.state {
            RoomState::WaitingForLoad => {
                let any_waiting = self.users.iter().any(|u| u.state == RoomUserState::WaitingForLoad);
                if !any_waiting {
                    let loaded_ids: Vec<UserId> = self
                        .users
                        .iter()
                        .filter(|u| u.state == RoomUserState::Loaded)
                        .map(|u| u.user_id)
                        .collect();
                    if loaded_ids.is_empty() {
                        effects.load_abandoned = true;
                        self.state = RoomState::Open;
                    } else {
                        for id in &loaded_ids {
                            if let Some(u) = self.find_user_mut(*id) {
                                u.state = RoomUserState::Playing;
                            }
                        }
                        effects.advanced_to_playing = loaded_ids;
                        self.state = RoomState::Playing;
                    }
                }
            },
            RoomState::Playing => {
                let any_playing = self.users.iter().any(|u| u.state == RoomUserState::Playing);
                if !any_playing {
                    effects.finished = self.finish_match();
                }
            },
            RoomState::Open => {},
        }

        if self.state == RoomState::Open && self.settings.auto_start_duration.is_some() {
            let any_ready = self.users.iter().any(|u| u.state == RoomUserState::Ready);
            let has_current_item = self.playlist.current_item().is_some();
            effects.auto_start = Some(any_ready && has_current_item);
        }

        effects
    }

    /// `true` once every joined user is `Ready` — the auto-start trigger
    ///.
    pub fn all_users_ready(&self) -> bool {
        !self.users.is_empty() && self.users.iter().all(|u| u.state == RoomUserState::Ready)
    }

    pub fn snapshot(&self, now: Instant) -> RoomSnapshot {
        RoomSnapshot {
            id: self.id,
            settings: self.settings.clone(),
            users: self.users.clone(),
            host_user_id: self.host_user_id,
            state: self.state,
            playlist: self.playlist.items().to_vec(),
            countdown_kind: self.countdown.map(|c| c.kind),
            countdown_remaining: self.countdown.map(|c| c.time_remaining(now)),
        }
    }
}
