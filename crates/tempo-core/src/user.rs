//! Per-user room membership: state machine, mods, and match-type state.

use serde::{Deserialize, Serialize};

use crate::ids::UserId;
use crate::match_type::MatchUserState;

/// A user's position in the per-room gameplay lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RoomUserState {
    Idle,
    Ready,
    WaitingForLoad,
    Loaded,
    Playing,
    FinishedPlay,
    Results,
    Spectating,
}

/// What should happen to a client-requested state change, per the
/// transition table below.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionOutcome {
    /// Transition is allowed; apply it.
    Allowed,
    /// Transition is a known race (un-readying mid-load); drop silently,
    /// no error, no broadcast.
    SilentDrop,
    /// Transition is invalid; reject with `InvalidStateChange`.
    Rejected,
}

impl RoomUserState {
    /// Validate a *client-requested* transition. Server-driven transitions
    /// (e.g. Idle → WaitingForLoad on `StartMatch`) are applied directly by
    /// the coordinator and never pass through this check.
    pub fn validate_client_transition(self, to: RoomUserState) -> TransitionOutcome {
        use RoomUserState::*;
        use TransitionOutcome::*;

        if self == to {
            // Idempotent no-op; the coordinator short-circuits before
            // broadcasting, but transitioning to the same state is never
            // invalid.
            return Allowed;
        }

        match (self, to) {
            (Idle, Ready) | (Idle, Spectating) => Allowed,
            (Ready, Idle) | (Ready, Spectating) => Allowed,

            (WaitingForLoad, Idle) | (Loaded, Idle) | (Playing, Idle) => SilentDrop,
            (WaitingForLoad, Loaded) => Allowed,
            (Playing, FinishedPlay) => Allowed,

            (FinishedPlay, Idle) => Allowed,

            (Results, Idle) | (Results, Ready) | (Results, Spectating) => Allowed,

            (Spectating, Idle) => Allowed,

            _ => Rejected,
        }
    }

    /// Whether this state counts as "mid-gameplay" for abort/spectate
    /// interactions.
    pub fn is_gameplay_state(self) -> bool {
        matches!(
            self,
            RoomUserState::WaitingForLoad | RoomUserState::Loaded | RoomUserState::Playing
        )
    }

    /// Whether a user in this state belongs to the room's gameplay
    /// broadcast group. FinishedPlay and Idle are non-members: returning to
    /// either removes the user from the group.
    pub fn is_in_gameplay_group(self) -> bool {
        matches!(self, RoomUserState::Ready | RoomUserState::Spectating) || self.is_gameplay_state()
    }
}

/// One selected mod and its settings, opaque beyond the acronym: legality
/// and compatibility are delegated to the external ruleset rules adapter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModEntry {
    pub acronym: String,
    #[serde(default)]
    pub settings: serde_json::Value,
}

/// Whether a user has the room's current beatmap available locally.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BeatmapAvailability {
    Unknown,
    Downloading { progress_percent: u8 },
    LocallyAvailable,
    NotAvailable,
}

/// A participant in a room (RoomUser).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoomUser {
    pub user_id: UserId,
    pub state: RoomUserState,
    pub mods: Vec<ModEntry>,
    pub beatmap_availability: BeatmapAvailability,
    pub match_state: MatchUserState,
}

impl RoomUser {
    pub fn new(user_id: UserId) -> Self {
        Self {
            user_id,
            state: RoomUserState::Idle,
            mods: Vec::new(),
            beatmap_availability: BeatmapAvailability::Unknown,
            match_state: MatchUserState::None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use RoomUserState::*;
    use TransitionOutcome::*;

    #[test]
    fn reserved_states_rejected_from_idle() {
        assert_eq!(Idle.validate_client_transition(WaitingForLoad), Rejected);
        assert_eq!(Idle.validate_client_transition(Playing), Rejected);
        assert_eq!(Idle.validate_client_transition(Results), Rejected);
        assert_eq!(Idle.validate_client_transition(FinishedPlay), Rejected);
    }

    #[test]
    fn idle_to_ready_and_spectating_allowed() {
        assert_eq!(Idle.validate_client_transition(Ready), Allowed);
        assert_eq!(Idle.validate_client_transition(Spectating), Allowed);
    }

    #[test]
    fn gameplay_un_ready_race_is_silently_dropped() {
        assert_eq!(WaitingForLoad.validate_client_transition(Idle), SilentDrop);
        assert_eq!(Loaded.validate_client_transition(Idle), SilentDrop);
        assert_eq!(Playing.validate_client_transition(Idle), SilentDrop);
    }

    #[test]
    fn waiting_for_load_can_only_advance_to_loaded() {
        assert_eq!(WaitingForLoad.validate_client_transition(Loaded), Allowed);
        assert_eq!(WaitingForLoad.validate_client_transition(Ready), Rejected);
        assert_eq!(
            WaitingForLoad.validate_client_transition(Spectating),
            Rejected
        );
    }

    #[test]
    fn playing_can_only_advance_to_finished() {
        assert_eq!(Playing.validate_client_transition(FinishedPlay), Allowed);
        assert_eq!(Playing.validate_client_transition(Ready), Rejected);
    }

    #[test]
    fn results_allows_idle_ready_spectating() {
        assert_eq!(Results.validate_client_transition(Idle), Allowed);
        assert_eq!(Results.validate_client_transition(Ready), Allowed);
        assert_eq!(Results.validate_client_transition(Spectating), Allowed);
        assert_eq!(Results.validate_client_transition(Loaded), Rejected);
    }

    #[test]
    fn spectating_only_returns_to_idle() {
        assert_eq!(Spectating.validate_client_transition(Idle), Allowed);
        assert_eq!(Spectating.validate_client_transition(Ready), Rejected);
    }

    #[test]
    fn same_state_is_always_allowed() {
        for s in [
            Idle,
            Ready,
            WaitingForLoad,
            Loaded,
            Playing,
            FinishedPlay,
            Results,
            Spectating,
        ] {
            assert_eq!(s.validate_client_transition(s), Allowed);
        }
    }

    #[test]
    fn gameplay_group_membership() {
        assert!(Ready.is_in_gameplay_group());
        assert!(Spectating.is_in_gameplay_group());
        assert!(WaitingForLoad.is_in_gameplay_group());
        assert!(Playing.is_in_gameplay_group());
        assert!(!FinishedPlay.is_in_gameplay_group());
        assert!(!Idle.is_in_gameplay_group());
    }
}
