//! Pluggable per-room match-type logic.
//!
//! The source expressed this via subclassing; per the teacher's own design
//! notes this is re-expressed here as a tagged variant with a small
//! capability surface (`on_join`/`on_leave`/`on_request`), with per-variant
//! state embedded directly in [`crate::user::RoomUser::match_state`]
//! instead of living on a trait object.

use serde::{Deserialize, Serialize};

use crate::error::CoordinatorError;
use crate::ids::UserId;
use crate::user::RoomUser;

/// Unique identifier for a team in `TeamVersus` play.
pub type TeamId = u8;

/// Per-user, per-match-type state embedded in `RoomUser`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MatchUserState {
    /// Head-to-head has no per-user state.
    None,
    /// Team-versus: which team the user is on.
    Team(TeamId),
}

/// A request routed to the active match-type strategy by
/// `SendMatchRequest` once the countdown-control tags have been handled
///.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MatchTypeRequest {
    ChangeTeam { team_id: TeamId },
}

/// The two built-in team ids for `TeamVersus`.
pub const TEAM_RED: TeamId = 0;
pub const TEAM_BLUE: TeamId = 1;

/// Pluggable per-room match logic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum MatchTypeKind {
    HeadToHead,
    TeamVersus,
}

impl MatchTypeKind {
    /// Called when a user joins the room (or when the match type is
    /// swapped — the coordinator replays this for every current user).
    pub fn on_join(&self, users: &mut [RoomUser], joining_user_id: UserId) {
        match self {
            MatchTypeKind::HeadToHead => {
                if let Some(u) = users.iter_mut().find(|u| u.user_id == joining_user_id) {
                    u.match_state = MatchUserState::None;
                }
            },
            MatchTypeKind::TeamVersus => {
                let team = smaller_team(users);
                if let Some(u) = users.iter_mut().find(|u| u.user_id == joining_user_id) {
                    u.match_state = MatchUserState::Team(team);
                }
            },
        }
    }

    /// Called when a user leaves the room. Neither strategy needs to
    /// rebalance existing members on leave — team assignment is only
    /// recomputed for new joiners.
    pub fn on_leave(&self, _users: &mut [RoomUser], _leaving_user_id: UserId) {}

    /// Handle a match-type-specific request from a user.
    pub fn on_request(
        &self,
        users: &mut [RoomUser],
        user_id: UserId,
        request: MatchTypeRequest,
    ) -> Result<(), CoordinatorError> {
        match (self, request) {
            (MatchTypeKind::TeamVersus, MatchTypeRequest::ChangeTeam { team_id }) => {
                if team_id != TEAM_RED && team_id != TEAM_BLUE {
                    return Err(CoordinatorError::InvalidState(format!(
                        "unknown team id {team_id}"
                    )));
                }
                if let Some(u) = users.iter_mut().find(|u| u.user_id == user_id) {
                    u.match_state = MatchUserState::Team(team_id);
                }
                Ok(())
            },
            (MatchTypeKind::HeadToHead, _) => Err(CoordinatorError::InvalidState(
                "head-to-head does not accept match-type requests".to_string(),
            )),
        }
    }
}

/// Assign a new team-versus user to the smaller team, breaking ties by
/// the lower team id.
fn smaller_team(users: &[RoomUser]) -> TeamId {
    let red = users
        .iter()
        .filter(|u| u.match_state == MatchUserState::Team(TEAM_RED))
        .count();
    let blue = users
        .iter()
        .filter(|u| u.match_state == MatchUserState::Team(TEAM_BLUE))
        .count();
    if blue < red { TEAM_BLUE } else { TEAM_RED }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user(id: UserId) -> RoomUser {
        RoomUser::new(id)
    }

    #[test]
    fn head_to_head_join_is_a_no_op() {
        let mut users = vec![user(1)];
        MatchTypeKind::HeadToHead.on_join(&mut users, 1);
        assert_eq!(users[0].match_state, MatchUserState::None);
    }

    #[test]
    fn team_versus_assigns_first_joiner_to_red() {
        let mut users = vec![user(1)];
        MatchTypeKind::TeamVersus.on_join(&mut users, 1);
        assert_eq!(users[0].match_state, MatchUserState::Team(TEAM_RED));
    }

    #[test]
    fn team_versus_balances_new_joiners() {
        let mut users = vec![user(1), user(2)];
        MatchTypeKind::TeamVersus.on_join(&mut users, 1);
        MatchTypeKind::TeamVersus.on_join(&mut users, 2);
        assert_ne!(users[0].match_state, users[1].match_state);
    }

    #[test]
    fn team_versus_ties_break_to_lowest_id_team() {
        // Both teams empty: tie broken to TEAM_RED (the lower id).
        let mut users = vec![user(1)];
        MatchTypeKind::TeamVersus.on_join(&mut users, 1);
        assert_eq!(users[0].match_state, MatchUserState::Team(TEAM_RED));
    }

    #[test]
    fn change_team_request_validates_team_exists() {
        let mut users = vec![user(1)];
        MatchTypeKind::TeamVersus.on_join(&mut users, 1);
        let err = MatchTypeKind::TeamVersus
            .on_request(&mut users, 1, MatchTypeRequest::ChangeTeam { team_id: 7 })
            .unwrap_err();
        assert!(matches!(err, CoordinatorError::InvalidState(_)));
    }

    #[test]
    fn change_team_request_moves_user() {
        let mut users = vec![user(1)];
        MatchTypeKind::TeamVersus.on_join(&mut users, 1);
        MatchTypeKind::TeamVersus
            .on_request(
                &mut users,
                1,
                MatchTypeRequest::ChangeTeam { team_id: TEAM_BLUE },
            )
            .unwrap();
        assert_eq!(users[0].match_state, MatchUserState::Team(TEAM_BLUE));
    }

    #[test]
    fn head_to_head_rejects_match_type_requests() {
        let mut users = vec![user(1)];
        let err = MatchTypeKind::HeadToHead
            .on_request(
                &mut users,
                1,
                MatchTypeRequest::ChangeTeam { team_id: TEAM_RED },
            )
            .unwrap_err();
        assert!(matches!(err, CoordinatorError::InvalidState(_)));
    }
}
