//! The playlist queue: ordered upcoming items, the current
//! item, and queue-mode governed rotation after each match.

use serde::{Deserialize, Serialize};

use crate::error::CoordinatorError;
use crate::ids::{PlaylistItemId, UserId};
use crate::user::ModEntry;

/// Who may add, edit, or remove playlist items, and how ownership rotates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum QueueMode {
    /// Only the host may add/edit/remove; at most one pending item at a
    /// time, continuously re-edited rather than appended to.
    HostOnly,
    /// Any user may append to the tail; only the owner may edit/remove
    /// their own items.
    AllPlayers,
    /// Like `AllPlayers`, but ownership rotates fairly: items are
    /// interleaved round-robin across the owners who have queued one.
    AllPlayersRoundRobin,
}

/// One entry in the playlist.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlaylistItem {
    pub id: PlaylistItemId,
    pub beatmap_id: u64,
    pub ruleset_id: u32,
    pub required_mods: Vec<ModEntry>,
    pub allowed_mods: Vec<ModEntry>,
    pub owner_id: UserId,
    pub expired: bool,
    /// Monotonic ordering key; the current item is the lowest non-expired
    /// by this key.
    pub order: u64,
}

/// Fields a caller may set on add/edit; `id`, `expired`, and `order` are
/// server-authoritative ("playlist-item id is server-authoritative").
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlaylistItemFields {
    pub beatmap_id: u64,
    pub ruleset_id: u32,
    pub required_mods: Vec<ModEntry>,
    pub allowed_mods: Vec<ModEntry>,
}

/// What happened to the playlist after a match finished.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FinishOutcome {
    pub expired_item_id: PlaylistItemId,
    /// `true` if the item that will now be served as "current" differs
    /// from the one that just finished — triggers the re-unready-all and
    /// re-validate-mods side effect.
    pub current_item_changed: bool,
    /// A freshly cloned successor item, for `HostOnly` replay mode.
    pub cloned_successor: Option<PlaylistItemId>,
}

#[derive(Debug, Default)]
pub struct PlaylistQueue {
    mode: QueueMode2,
    items: Vec<PlaylistItem>,
    next_id: PlaylistItemId,
    next_order: u64,
}

/// Local mirror of `QueueMode` with a `Default` impl so `PlaylistQueue`
/// can derive `Default` for test construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct QueueMode2(QueueMode);

impl Default for QueueMode2 {
    fn default() -> Self {
        QueueMode2(QueueMode::HostOnly)
    }
}

impl PlaylistQueue {
    pub fn new(mode: QueueMode) -> Self {
        Self {
            mode: QueueMode2(mode),
            items: Vec::new(),
            next_id: 1,
            next_order: 0,
        }
    }

    pub fn mode(&self) -> QueueMode {
        self.mode.0
    }

    pub fn items(&self) -> &[PlaylistItem] {
        &self.items
    }

    /// The current item: lowest non-expired by `order`. `None` if every
    /// item is expired (or the queue is empty) — Ready transitions must
    /// fail in that state.
    pub fn current_item(&self) -> Option<&PlaylistItem> {
        self.items
            .iter()
            .filter(|i| !i.expired)
            .min_by_key(|i| i.order)
    }

    fn next_order_key(&mut self) -> u64 {
        let order = self.next_order;
        self.next_order += 1;
        order
    }

    /// Validate and append/replace a pending item. Ruleset legality, mod
    /// compatibility, and beatmap existence are validated by the caller
    /// (the coordinator, via the external rules/persistence adapters)
    /// before calling this — those checks need I/O and don't belong in
    /// this synchronous structure.
    pub fn add_item(
        &mut self,
        requester_id: UserId,
        is_host: bool,
        fields: PlaylistItemFields,
    ) -> Result<PlaylistItemId, CoordinatorError> {
        match self.mode.0 {
            QueueMode::HostOnly => {
                if !is_host {
                    return Err(CoordinatorError::NotHost);
                }
                if self.items.iter().any(|i| !i.expired) {
                    return Err(CoordinatorError::InvalidState(
                        "host-only queue already has a pending item; edit it instead".to_string(),
                    ));
                }
            },
            QueueMode::AllPlayers | QueueMode::AllPlayersRoundRobin => {},
        }

        let id = self.next_id;
        self.next_id += 1;
        let order = self.allocate_order_for_owner(requester_id);
        self.items.push(PlaylistItem {
            id,
            beatmap_id: fields.beatmap_id,
            ruleset_id: fields.ruleset_id,
            required_mods: fields.required_mods,
            allowed_mods: fields.allowed_mods,
            owner_id: requester_id,
            expired: false,
            order,
        });
        Ok(id)
    }

    fn allocate_order_for_owner(&mut self, owner_id: UserId) -> u64 {
        match self.mode.0 {
            QueueMode::AllPlayersRoundRobin => {
                // Interleave: this owner's nth item (0-based) is the
                // primary sort key, the owner's first-seen rank among
                // current owners is the tiebreak. This keeps a fresh
                // owner's first item slotted ahead of a prolific owner's
                // Nth item.
                let nth_for_owner = self.items.iter().filter(|i| i.owner_id == owner_id).count() as u64;
                let owner_rank = self.owner_first_seen_rank(owner_id);
                nth_for_owner * 1_000_000 + owner_rank
            },
            QueueMode::HostOnly | QueueMode::AllPlayers => self.next_order_key(),
        }
    }

    fn owner_first_seen_rank(&self, owner_id: UserId) -> u64 {
        let mut owners: Vec<UserId> = self.items.iter().map(|i| i.owner_id).collect();
        owners.dedup();
        match owners.iter().position(|&o| o == owner_id) {
            Some(rank) => rank as u64,
            None => owners.len() as u64,
        }
    }

    pub fn edit_item(
        &mut self,
        item_id: PlaylistItemId,
        requester_id: UserId,
        is_host: bool,
        fields: PlaylistItemFields,
    ) -> Result<(), CoordinatorError> {
        self.check_mutation_permission(item_id, requester_id, is_host)?;
        let item = self
            .items
            .iter_mut()
            .find(|i| i.id == item_id)
            .ok_or_else(|| CoordinatorError::InvalidState("playlist item not found".to_string()))?;
        item.beatmap_id = fields.beatmap_id;
        item.ruleset_id = fields.ruleset_id;
        item.required_mods = fields.required_mods;
        item.allowed_mods = fields.allowed_mods;
        Ok(())
    }

    /// Remove an item. Per the resolved open question (DESIGN.md), removing
    /// the current item is permitted even while users are Ready; the
    /// coordinator is responsible for re-unreadying everyone afterward if
    /// the current item changed as a result.
    pub fn remove_item(
        &mut self,
        item_id: PlaylistItemId,
        requester_id: UserId,
        is_host: bool,
    ) -> Result<(), CoordinatorError> {
        self.check_mutation_permission(item_id, requester_id, is_host)?;
        self.items.retain(|i| i.id != item_id);
        Ok(())
    }

    fn check_mutation_permission(
        &self,
        item_id: PlaylistItemId,
        requester_id: UserId,
        is_host: bool,
    ) -> Result<(), CoordinatorError> {
        let item = self
            .items
            .iter()
            .find(|i| i.id == item_id)
            .ok_or_else(|| CoordinatorError::InvalidState("playlist item not found".to_string()))?;
        match self.mode.0 {
            QueueMode::HostOnly => {
                if !is_host {
                    return Err(CoordinatorError::NotHost);
                }
            },
            QueueMode::AllPlayers | QueueMode::AllPlayersRoundRobin => {
                if item.owner_id != requester_id {
                    return Err(CoordinatorError::InvalidState(
                        "only the owner may edit or remove this item".to_string(),
                    ));
                }
            },
        }
        Ok(())
    }

    /// Mark the current item expired and derive the successor per mode
    ///.
    pub fn finish_current_item(&mut self) -> Option<FinishOutcome> {
        let current_id = self.current_item()?.id;
        let before_current = self.current_item().map(|i| i.id);

        let finishing = self.items.iter_mut().find(|i| i.id == current_id).unwrap();
        finishing.expired = true;

        let cloned_successor = if self.mode.0 == QueueMode::HostOnly {
            let template = self
                .items
                .iter()
                .find(|i| i.id == current_id)
                .cloned()
                .unwrap();
            let id = self.next_id;
            self.next_id += 1;
            let order = self.next_order_key();
            self.items.push(PlaylistItem {
                id,
                beatmap_id: template.beatmap_id,
                ruleset_id: template.ruleset_id,
                required_mods: template.required_mods,
                allowed_mods: template.allowed_mods,
                owner_id: template.owner_id,
                expired: false,
                order,
            });
            Some(id)
        } else {
            None
        };

        let after_current = self.current_item().map(|i| i.id);
        Some(FinishOutcome {
            expired_item_id: current_id,
            current_item_changed: before_current != after_current,
            cloned_successor,
        })
    }

    /// Recompute ordering for the active mode — called after a queue-mode
    /// change (`ChangeSettings`).
    pub fn re_derive_ordering(&mut self, new_mode: QueueMode) {
        self.mode = QueueMode2(new_mode);
        if new_mode != QueueMode::AllPlayersRoundRobin {
            let mut items: Vec<PlaylistItem> = std::mem::take(&mut self.items);
            items.sort_by_key(|i| i.order);
            for (idx, item) in items.iter_mut().enumerate() {
                item.order = idx as u64;
            }
            self.next_order = items.len() as u64;
            self.items = items;
            return;
        }

        let mut items: Vec<PlaylistItem> = std::mem::take(&mut self.items);
        items.sort_by_key(|i| i.order);
        let ordered_ids: Vec<PlaylistItemId> = items.iter().map(|i| i.id).collect();
        self.items = items;
        for id in ordered_ids {
            let owner = self.items.iter().find(|i| i.id == id).unwrap().owner_id;
            let order = self.allocate_order_for_owner_excluding(owner, id);
            if let Some(item) = self.items.iter_mut().find(|i| i.id == id) {
                item.order = order;
            }
        }
    }

    fn allocate_order_for_owner_excluding(&self, owner_id: UserId, excluding: PlaylistItemId) -> u64 {
        let nth_for_owner = self
            .items
            .iter()
            .filter(|i| i.owner_id == owner_id && i.order < self.items.iter().find(|x| x.id == excluding).map(|x| x.order).unwrap_or(u64::MAX) && i.id != excluding)
            .count() as u64;
        let owner_rank = self.owner_first_seen_rank(owner_id);
        nth_for_owner * 1_000_000 + owner_rank
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fields(beatmap_id: u64) -> PlaylistItemFields {
        PlaylistItemFields {
            beatmap_id,
            ruleset_id: 0,
            required_mods: vec![],
            allowed_mods: vec![],
        }
    }

    #[test]
    fn current_item_is_lowest_non_expired_order() {
        let mut q = PlaylistQueue::new(QueueMode::AllPlayers);
        let a = q.add_item(1, false, fields(1)).unwrap();
        let _b = q.add_item(1, false, fields(2)).unwrap();
        assert_eq!(q.current_item().unwrap().id, a);
    }

    #[test]
    fn empty_queue_has_no_current_item() {
        let q = PlaylistQueue::new(QueueMode::HostOnly);
        assert!(q.current_item().is_none());
    }

    #[test]
    fn all_expired_has_no_current_item() {
        let mut q = PlaylistQueue::new(QueueMode::HostOnly);
        q.add_item(1, true, fields(1)).unwrap();
        q.finish_current_item().unwrap();
        assert!(q.current_item().is_none());
    }

    #[test]
    fn host_only_rejects_non_host_add() {
        let mut q = PlaylistQueue::new(QueueMode::HostOnly);
        let err = q.add_item(2, false, fields(1)).unwrap_err();
        assert_eq!(err, CoordinatorError::NotHost);
    }

    #[test]
    fn host_only_rejects_second_pending_item() {
        let mut q = PlaylistQueue::new(QueueMode::HostOnly);
        q.add_item(1, true, fields(1)).unwrap();
        let err = q.add_item(1, true, fields(2)).unwrap_err();
        assert!(matches!(err, CoordinatorError::InvalidState(_)));
    }

    #[test]
    fn host_only_finish_clones_current_item_for_replay() {
        let mut q = PlaylistQueue::new(QueueMode::HostOnly);
        let original = q.add_item(1, true, fields(42)).unwrap();
        let outcome = q.finish_current_item().unwrap();
        assert_eq!(outcome.expired_item_id, original);
        assert!(outcome.cloned_successor.is_some());
        let successor = q.current_item().unwrap();
        assert_eq!(successor.beatmap_id, 42);
        assert_ne!(successor.id, original);
        assert!(outcome.current_item_changed);
    }

    #[test]
    fn all_players_finish_advances_without_creating() {
        let mut q = PlaylistQueue::new(QueueMode::AllPlayers);
        let a = q.add_item(1, false, fields(1)).unwrap();
        let b = q.add_item(2, false, fields(2)).unwrap();
        let before_count = q.items().len();
        let outcome = q.finish_current_item().unwrap();
        assert_eq!(outcome.expired_item_id, a);
        assert!(outcome.cloned_successor.is_none());
        assert_eq!(q.items().len(), before_count);
        assert_eq!(q.current_item().unwrap().id, b);
        assert!(outcome.current_item_changed);
    }

    #[test]
    fn all_players_only_owner_may_edit() {
        let mut q = PlaylistQueue::new(QueueMode::AllPlayers);
        let a = q.add_item(1, false, fields(1)).unwrap();
        let err = q.edit_item(a, 2, false, fields(99)).unwrap_err();
        assert!(matches!(err, CoordinatorError::InvalidState(_)));
        q.edit_item(a, 1, false, fields(99)).unwrap();
        assert_eq!(q.items()[0].beatmap_id, 99);
    }

    #[test]
    fn round_robin_interleaves_two_owners() {
        let mut q = PlaylistQueue::new(QueueMode::AllPlayersRoundRobin);
        let a1 = q.add_item(1, false, fields(1)).unwrap();
        let a2 = q.add_item(1, false, fields(2)).unwrap();
        let b1 = q.add_item(2, false, fields(3)).unwrap();

        // Owner 1 queued two, owner 2 queued one after. Expected order:
        // a1 (owner1 nth=0), b1 (owner2 nth=0), a2 (owner1 nth=1).
        let ids: Vec<_> = {
            let mut items: Vec<_> = q.items().to_vec();
            items.sort_by_key(|i| i.order);
            items.into_iter().map(|i| i.id).collect()
        };
        assert_eq!(ids, vec![a1, b1, a2]);
    }

    #[test]
    fn remove_current_item_is_permitted() {
        let mut q = PlaylistQueue::new(QueueMode::AllPlayers);
        let a = q.add_item(1, false, fields(1)).unwrap();
        let _b = q.add_item(2, false, fields(2)).unwrap();
        q.remove_item(a, 1, false).unwrap();
        assert_eq!(q.current_item().unwrap().beatmap_id, 2);
    }

    #[test]
    fn queue_mode_change_rederives_ordering() {
        let mut q = PlaylistQueue::new(QueueMode::AllPlayers);
        q.add_item(1, false, fields(1)).unwrap();
        q.add_item(2, false, fields(2)).unwrap();
        q.re_derive_ordering(QueueMode::AllPlayersRoundRobin);
        assert_eq!(q.mode(), QueueMode::AllPlayersRoundRobin);
        assert!(q.current_item().is_some());
    }
}
