//! The broadcast groups fed to the Room Coordinator: a control
//! group of every connection joined to a room, and a gameplay group that's
//! a subset of it ("control group `room:{id}` and gameplay group
//! `room:{id}:true`").
//!
//! Grounded on `room_manager.rs`'s `broadcast_to_room` /
//! `broadcast_to_room_except` / `send_to_player`, generalized from "every
//! connection in the room" to two independently tracked membership sets.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use tokio::sync::{RwLock, mpsc};

use tempo_core::ids::{RoomId, UserId};
use tempo_core::net::messages::ServerMessage;
use tempo_core::net::protocol::encode_server_message;

/// Which of a room's two broadcast groups an operation targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BroadcastGroup {
    Control,
    Gameplay,
}

#[async_trait]
pub trait RoomBroadcaster: Send + Sync {
    async fn send_to_room(&self, room_id: RoomId, message: &ServerMessage);
    async fn send_to_gameplay_group(&self, room_id: RoomId, message: &ServerMessage);
    async fn send_to_user(&self, user_id: UserId, message: &ServerMessage);
    async fn add_to_group(&self, room_id: RoomId, user_id: UserId, group: BroadcastGroup);
    async fn remove_from_group(&self, room_id: RoomId, user_id: UserId, group: BroadcastGroup);
}

#[derive(Default)]
struct RoomGroups {
    control: HashSet<UserId>,
    gameplay: HashSet<UserId>,
}

/// Real `RoomBroadcaster`, backed by one outbound `mpsc` channel per
/// connected user. The hub module registers/unregisters a
/// user's sender as connections come and go; the coordinator only ever
/// sees the group-membership surface above.
#[derive(Default)]
pub struct HubBroadcaster {
    senders: RwLock<HashMap<UserId, mpsc::Sender<Vec<u8>>>>,
    groups: RwLock<HashMap<RoomId, RoomGroups>>,
}

impl HubBroadcaster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the outbound channel for a user's hub connection. A second
    /// registration for the same user replaces the first — the superseded
    /// connection's writer task will find its channel's receiver dropped
    /// and stop (the superseded connection is torn down after
    /// being told to disconnect, not by racing on this map).
    pub async fn register(&self, user_id: UserId, sender: mpsc::Sender<Vec<u8>>) {
        self.senders.write().await.insert(user_id, sender);
    }

    pub async fn unregister(&self, user_id: UserId) {
        self.senders.write().await.remove(&user_id);
    }

    async fn deliver(&self, user_id: UserId, data: &[u8]) {
        let senders = self.senders.read().await;
        if let Some(sender) = senders.get(&user_id) {
            let _ = sender.send(data.to_vec()).await;
        }
    }
}

#[async_trait]
impl RoomBroadcaster for HubBroadcaster {
    async fn send_to_room(&self, room_id: RoomId, message: &ServerMessage) {
        let Ok(data) = encode_server_message(message) else {
            tracing::error!(room_id, "failed to encode message for room broadcast");
            return;
        };
        let targets: Vec<UserId> = {
            let groups = self.groups.read().await;
            groups
                .get(&room_id)
                .map(|g| g.control.iter().copied().collect())
                .unwrap_or_default()
        };
        for user_id in targets {
            self.deliver(user_id, &data).await;
        }
    }

    async fn send_to_gameplay_group(&self, room_id: RoomId, message: &ServerMessage) {
        let Ok(data) = encode_server_message(message) else {
            tracing::error!(room_id, "failed to encode message for gameplay broadcast");
            return;
        };
        let targets: Vec<UserId> = {
            let groups = self.groups.read().await;
            groups
                .get(&room_id)
                .map(|g| g.gameplay.iter().copied().collect())
                .unwrap_or_default()
        };
        for user_id in targets {
            self.deliver(user_id, &data).await;
        }
    }

    async fn send_to_user(&self, user_id: UserId, message: &ServerMessage) {
        let Ok(data) = encode_server_message(message) else {
            tracing::error!(user_id, "failed to encode message for direct send");
            return;
        };
        self.deliver(user_id, &data).await;
    }

    async fn add_to_group(&self, room_id: RoomId, user_id: UserId, group: BroadcastGroup) {
        let mut groups = self.groups.write().await;
        let entry = groups.entry(room_id).or_default();
        match group {
            BroadcastGroup::Control => entry.control.insert(user_id),
            BroadcastGroup::Gameplay => entry.gameplay.insert(user_id),
        };
    }

    async fn remove_from_group(&self, room_id: RoomId, user_id: UserId, group: BroadcastGroup) {
        let mut groups = self.groups.write().await;
        if let Some(entry) = groups.get_mut(&room_id) {
            match group {
                BroadcastGroup::Control => entry.control.remove(&user_id),
                BroadcastGroup::Gameplay => entry.gameplay.remove(&user_id),
            };
            if entry.control.is_empty() {
                groups.remove(&room_id);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn send_to_room_reaches_only_control_members() {
        let broadcaster = HubBroadcaster::new();
        let (tx1, mut rx1) = mpsc::channel(8);
        let (tx2, mut rx2) = mpsc::channel(8);
        broadcaster.register(1, tx1).await;
        broadcaster.register(2, tx2).await;
        broadcaster.add_to_group(7, 1, BroadcastGroup::Control).await;

        broadcaster.send_to_room(7, &ServerMessage::CountdownStopped).await;

        assert!(rx1.recv().await.is_some());
        assert!(rx2.try_recv().is_err());
    }

    #[tokio::test]
    async fn gameplay_group_is_independent_of_control_group() {
        let broadcaster = HubBroadcaster::new();
        let (tx1, mut rx1) = mpsc::channel(8);
        broadcaster.register(1, tx1).await;
        broadcaster.add_to_group(7, 1, BroadcastGroup::Control).await;

        broadcaster.send_to_gameplay_group(7, &ServerMessage::LoadRequested).await;
        assert!(
            rx1.try_recv().is_err(),
            "control-only member must not receive gameplay-group broadcasts"
        );

        broadcaster.add_to_group(7, 1, BroadcastGroup::Gameplay).await;
        broadcaster.send_to_gameplay_group(7, &ServerMessage::LoadRequested).await;
        assert!(rx1.recv().await.is_some());
    }

    #[tokio::test]
    async fn remove_from_group_stops_delivery() {
        let broadcaster = HubBroadcaster::new();
        let (tx1, mut rx1) = mpsc::channel(8);
        broadcaster.register(1, tx1).await;
        broadcaster.add_to_group(7, 1, BroadcastGroup::Control).await;
        broadcaster
            .remove_from_group(7, 1, BroadcastGroup::Control)
            .await;

        broadcaster.send_to_room(7, &ServerMessage::CountdownStopped).await;
        assert!(rx1.try_recv().is_err());
    }

    #[tokio::test]
    async fn send_to_user_bypasses_group_membership() {
        let broadcaster = HubBroadcaster::new();
        let (tx1, mut rx1) = mpsc::channel(8);
        broadcaster.register(1, tx1).await;

        broadcaster
            .send_to_user(1, &ServerMessage::DisconnectRequested)
            .await;
        assert!(rx1.recv().await.is_some());
    }
}
