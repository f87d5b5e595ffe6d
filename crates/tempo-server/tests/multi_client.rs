mod common;

use tempo_core::match_type::{MatchTypeRequest, TEAM_BLUE, TEAM_RED};
use tempo_core::net::messages::{ClientMessage, MatchRequestKind, ServerMessage};
use tempo_core::playlist::PlaylistItemFields;
use tempo_core::user::{BeatmapAvailability, ModEntry, RoomUserState};

use common::{TestServer, join_room, recv, send, ws_connect};

async fn add_item(host: &mut common::WsStream, beatmap_id: u64) {
    send(
        host,
        &ClientMessage::AddPlaylistItem {
            item: PlaylistItemFields {
                beatmap_id,
                ruleset_id: 0,
                required_mods: Vec::new(),
                allowed_mods: Vec::new(),
            },
        },
    )
    .await;
    assert!(matches!(recv(host).await, ServerMessage::PlaylistItemAdded { .. }));
}

#[tokio::test]
async fn user_initiated_countdown_fires_internal_start() {
    let server = TestServer::new().await;
    server.seed_room(1, 100).await;
    server.persistence.seed_beatmap(42, "checksum").await;

    let mut host = ws_connect(&server, 100).await;
    join_room(&mut host, 1).await;
    add_item(&mut host, 42).await;

    send(&mut host, &ClientMessage::ChangeState { state: RoomUserState::Ready }).await;
    assert!(matches!(recv(&mut host).await, ServerMessage::UserStateChanged { .. }));

    send(
        &mut host,
        &ClientMessage::SendMatchRequest { request: MatchRequestKind::StartCountdown { duration_secs: 1 } },
    )
    .await;
    assert!(matches!(
        recv(&mut host).await,
        ServerMessage::CountdownStarted { duration_secs: 1 }
    ));

    // The countdown timer fires internal_start after the duration elapses.
    match recv(&mut host).await {
        ServerMessage::UserStateChanged { user_id: 100, state: RoomUserState::WaitingForLoad } => {},
        other => panic!("expected WaitingForLoad from internal_start, got {other:?}"),
    }
}

#[tokio::test]
async fn stopping_the_countdown_prevents_internal_start() {
    let server = TestServer::new().await;
    server.seed_room(1, 100).await;
    server.persistence.seed_beatmap(42, "checksum").await;

    let mut host = ws_connect(&server, 100).await;
    join_room(&mut host, 1).await;
    add_item(&mut host, 42).await;
    send(&mut host, &ClientMessage::ChangeState { state: RoomUserState::Ready }).await;
    recv(&mut host).await;

    send(
        &mut host,
        &ClientMessage::SendMatchRequest { request: MatchRequestKind::StartCountdown { duration_secs: 5 } },
    )
    .await;
    recv(&mut host).await; // CountdownStarted

    send(&mut host, &ClientMessage::SendMatchRequest { request: MatchRequestKind::StopCountdown }).await;
    assert!(matches!(recv(&mut host).await, ServerMessage::CountdownStopped));

    // No further message arrives before the original duration would have
    // elapsed.
    assert!(common::try_recv(&mut host, 300).await.is_none());
}

#[tokio::test]
async fn only_host_may_start_a_countdown() {
    let server = TestServer::new().await;
    server.seed_room(1, 100).await;

    let mut host = ws_connect(&server, 100).await;
    join_room(&mut host, 1).await;
    let mut guest = ws_connect(&server, 200).await;
    join_room(&mut guest, 1).await;
    recv(&mut host).await; // UserJoined

    send(
        &mut guest,
        &ClientMessage::SendMatchRequest { request: MatchRequestKind::StartCountdown { duration_secs: 10 } },
    )
    .await;
    assert!(matches!(recv(&mut guest).await, ServerMessage::Error { .. }));
}

#[tokio::test]
async fn mod_changes_are_broadcast_to_the_whole_room() {
    let server = TestServer::new().await;
    server.seed_room(1, 100).await;

    let mut host = ws_connect(&server, 100).await;
    join_room(&mut host, 1).await;
    let mut guest = ws_connect(&server, 200).await;
    join_room(&mut guest, 1).await;
    recv(&mut host).await; // UserJoined

    let mods = vec![ModEntry { acronym: "DT".to_string(), settings: serde_json::Value::Null }];
    send(&mut guest, &ClientMessage::ChangeUserMods { mods: mods.clone() }).await;

    match recv(&mut host).await {
        ServerMessage::UserModsChanged { user_id, mods: broadcast_mods } => {
            assert_eq!(user_id, 200);
            assert_eq!(broadcast_mods, mods);
        },
        other => panic!("expected UserModsChanged, got {other:?}"),
    }
}

#[tokio::test]
async fn beatmap_availability_changes_are_broadcast() {
    let server = TestServer::new().await;
    server.seed_room(1, 100).await;

    let mut host = ws_connect(&server, 100).await;
    join_room(&mut host, 1).await;
    let mut guest = ws_connect(&server, 200).await;
    join_room(&mut guest, 1).await;
    recv(&mut host).await; // UserJoined

    send(
        &mut guest,
        &ClientMessage::ChangeBeatmapAvailability { availability: BeatmapAvailability::Downloading { progress_percent: 50 } },
    )
    .await;

    match recv(&mut host).await {
        ServerMessage::UserBeatmapAvailabilityChanged { user_id, availability } => {
            assert_eq!(user_id, 200);
            assert_eq!(availability, BeatmapAvailability::Downloading { progress_percent: 50 });
        },
        other => panic!("expected UserBeatmapAvailabilityChanged, got {other:?}"),
    }
}

#[tokio::test]
async fn abort_gameplay_returns_loading_users_to_idle() {
    let server = TestServer::new().await;
    server.seed_room(1, 100).await;
    server.persistence.seed_beatmap(42, "checksum").await;

    let mut host = ws_connect(&server, 100).await;
    join_room(&mut host, 1).await;
    add_item(&mut host, 42).await;
    send(&mut host, &ClientMessage::ChangeState { state: RoomUserState::Ready }).await;
    recv(&mut host).await;

    send(&mut host, &ClientMessage::StartMatch).await;
    recv(&mut host).await; // UserStateChanged -> WaitingForLoad
    recv(&mut host).await; // RoomStateChanged -> WaitingForLoad

    send(&mut host, &ClientMessage::AbortGameplay).await;
    match recv(&mut host).await {
        ServerMessage::UserStateChanged { user_id: 100, state: RoomUserState::Idle } => {},
        other => panic!("expected UserStateChanged -> Idle, got {other:?}"),
    }
}

#[tokio::test]
async fn team_versus_balances_across_joiners_and_supports_switching() {
    let server = TestServer::new().await;
    server.seed_room(1, 100).await;

    let mut host = ws_connect(&server, 100).await;
    let reply = join_room(&mut host, 1).await;
    let snapshot = match reply {
        ServerMessage::RoomState { room } => room,
        other => panic!("expected RoomState, got {other:?}"),
    };
    let settings = tempo_core::room::RoomSettings {
        match_type: tempo_core::match_type::MatchTypeKind::TeamVersus,
        ..snapshot.settings
    };
    send(&mut host, &ClientMessage::ChangeSettings { settings }).await;
    assert!(matches!(recv(&mut host).await, ServerMessage::SettingsChanged { .. }));

    send(
        &mut host,
        &ClientMessage::SendMatchRequest {
            request: MatchRequestKind::MatchType(MatchTypeRequest::ChangeTeam { team_id: TEAM_BLUE }),
        },
    )
    .await;
    match recv(&mut host).await {
        ServerMessage::RoomState { room } => {
            let user = room.users.iter().find(|u| u.user_id == 100).unwrap();
            assert_eq!(
                user.match_state,
                tempo_core::match_type::MatchUserState::Team(TEAM_BLUE)
            );
        },
        other => panic!("expected RoomState, got {other:?}"),
    }
    let _ = TEAM_RED;
}

#[tokio::test]
async fn host_only_queue_mode_rejects_a_second_pending_item_from_a_guest() {
    let server = TestServer::new().await;
    server.seed_room(1, 100).await;
    server.persistence.seed_beatmap(42, "checksum").await;

    let mut host = ws_connect(&server, 100).await;
    join_room(&mut host, 1).await;
    let mut guest = ws_connect(&server, 200).await;
    join_room(&mut guest, 1).await;
    recv(&mut host).await; // UserJoined

    add_item(&mut host, 42).await;
    recv(&mut guest).await; // PlaylistItemAdded broadcast to the guest too

    send(
        &mut guest,
        &ClientMessage::AddPlaylistItem {
            item: PlaylistItemFields {
                beatmap_id: 42,
                ruleset_id: 0,
                required_mods: Vec::new(),
                allowed_mods: Vec::new(),
            },
        },
    )
    .await;
    assert!(matches!(recv(&mut guest).await, ServerMessage::Error { .. }));
}
