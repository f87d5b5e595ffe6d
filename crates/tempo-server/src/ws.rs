//! The `/ws` hub endpoint. One upgrade per `HubKind`; identity
//! and the opaque client-instance token arrive as query parameters since
//! the hub has no HTTP body to carry a first `JoinRoom` handshake message
//! (unlike the teacher's lobby-code join flow).
//!
//! Grounded on `ws.rs`'s split-sink/spawned-writer/read-loop shape: a
//! dedicated writer task drains a bounded `mpsc` channel into the socket
//! while the read loop decodes and dispatches incoming frames.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{ConnectInfo, Query, State, WebSocketUpgrade};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;

use tempo_core::ids::{HubKind, RoomId, TokenId, UserId};
use tempo_core::net::messages::{ClientMessage, ServerMessage};
use tempo_core::net::protocol::decode_client_message;

use crate::state::{AppState, ConnectionGuard, IpConnectionGuard};

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

fn default_hub() -> HubKind {
    HubKind::Multiplayer
}

#[derive(Debug, Deserialize)]
pub struct WsParams {
    user_id: UserId,
    token: String,
    #[serde(default = "default_hub")]
    hub: HubKind,
}

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Query(params): Query<WsParams>,
) -> impl IntoResponse {
    let ip = addr.ip();
    let max_per_ip = state.config.limits.max_ws_per_ip;
    let Some(ip_guard) = IpConnectionGuard::try_acquire(ip, state.ws_per_ip.clone(), max_per_ip) else {
        return (StatusCode::TOO_MANY_REQUESTS, "too many connections from this address").into_response();
    };
    if state.ws_connection_count.load(Ordering::Relaxed) >= state.config.limits.max_ws_connections {
        return (StatusCode::SERVICE_UNAVAILABLE, "server at capacity").into_response();
    }

    ws.on_upgrade(move |socket| handle_socket(socket, state, params, ip_guard))
        .into_response()
}

async fn handle_socket(socket: WebSocket, state: AppState, params: WsParams, ip_guard: IpConnectionGuard) {
    let _ip_guard = ip_guard;
    let _conn_guard = ConnectionGuard::new(state.ws_connection_count.clone());

    let (ws_sender, mut ws_receiver) = socket.split();

    let user_id = params.user_id;
    let token_id = TokenId(params.token.clone());
    let hub = params.hub;
    let connection_id = NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed);

    let superseded = match state.coordinator.connect(user_id, token_id, hub, connection_id).await {
        Ok(superseded) => superseded,
        Err(err) => {
            tracing::warn!(user_id, error = %err, "failed to register connection");
            return;
        },
    };

    // Tell the connection we're about to replace *before* swapping the
    // registered sender out from under it.
    if superseded.is_some() {
        state
            .broadcaster
            .send_to_user(user_id, &ServerMessage::DisconnectRequested)
            .await;
    }

    let (tx, rx) = mpsc::channel::<Vec<u8>>(state.config.limits.player_message_buffer);
    state.broadcaster.register(user_id, tx).await;
    spawn_writer(ws_sender, rx);

    let mut current_room_id: Option<RoomId> = None;
    read_loop(&mut ws_receiver, &state, user_id, &mut current_room_id).await;

    state.coordinator.disconnect(user_id, hub, connection_id).await;
    state.broadcaster.unregister(user_id).await;

    tracing::info!(user_id, connection_id, "connection closed");
}

fn spawn_writer(
    mut ws_sender: futures::stream::SplitSink<WebSocket, Message>,
    mut rx: mpsc::Receiver<Vec<u8>>,
) {
    tokio::spawn(async move {
        while let Some(data) = rx.recv().await {
            if ws_sender.send(Message::Binary(data.into())).await.is_err() {
                break;
            }
        }
    });
}

async fn read_loop(
    ws_receiver: &mut futures::stream::SplitStream<WebSocket>,
    state: &AppState,
    user_id: UserId,
    current_room_id: &mut Option<RoomId>,
) {
    while let Some(Ok(msg)) = ws_receiver.next().await {
        let data = match msg {
            Message::Binary(d) => d,
            Message::Close(_) => break,
            _ => continue,
        };
        if data.is_empty() {
            continue;
        }
        let client_msg = match decode_client_message(&data) {
            Ok(m) => m,
            Err(err) => {
                tracing::debug!(user_id, error = %err, "failed to decode client message");
                continue;
            },
        };
        dispatch(state, user_id, client_msg, current_room_id).await;
    }
}

async fn send_error(state: &AppState, user_id: UserId, message: impl std::fmt::Display) {
    state
        .broadcaster
        .send_to_user(user_id, &ServerMessage::Error { message: message.to_string() })
        .await;
}

async fn dispatch(state: &AppState, user_id: UserId, msg: ClientMessage, current_room_id: &mut Option<RoomId>) {
    let coordinator = &state.coordinator;

    // Every message but `JoinRoom` operates on the room this connection is
    // already in; `InvitePlayer` is the one exception that still needs a
    // room (the room being invited into), handled below.
    let Some(room_id) = (match &msg {
        ClientMessage::JoinRoom { .. } => None,
        _ => *current_room_id,
    }) else {
        if let ClientMessage::JoinRoom { room_id, password } = msg {
            match coordinator.join_room(room_id, user_id, password).await {
                Ok(snapshot) => {
                    *current_room_id = Some(room_id);
                    state
                        .broadcaster
                        .send_to_user(user_id, &ServerMessage::RoomState { room: snapshot })
                        .await;
                },
                Err(err) => send_error(state, user_id, err).await,
            }
        } else {
            send_error(state, user_id, "not joined to a room").await;
        }
        return;
    };

    match msg {
        ClientMessage::JoinRoom { .. } => unreachable!("handled above"),
        ClientMessage::LeaveRoom => {
            coordinator.leave_room(room_id, user_id).await;
            *current_room_id = None;
        },
        ClientMessage::ChangeState { state: to } => {
            if let Err(err) = coordinator.change_state(room_id, user_id, to).await {
                send_error(state, user_id, err).await;
            }
        },
        ClientMessage::ChangeSettings { settings } => {
            if let Err(err) = coordinator.change_settings(room_id, user_id, settings).await {
                send_error(state, user_id, err).await;
            }
        },
        ClientMessage::ChangeUserMods { mods } => {
            if let Err(err) = coordinator.change_user_mods(room_id, user_id, mods).await {
                send_error(state, user_id, err).await;
            }
        },
        ClientMessage::ChangeBeatmapAvailability { availability } => {
            if let Err(err) = coordinator.change_beatmap_availability(room_id, user_id, availability).await {
                send_error(state, user_id, err).await;
            }
        },
        ClientMessage::SendMatchRequest { request } => {
            if let Err(err) = coordinator.send_match_request(room_id, user_id, request).await {
                send_error(state, user_id, err).await;
            }
        },
        ClientMessage::StartMatch => {
            if let Err(err) = coordinator.start_match(room_id, user_id).await {
                send_error(state, user_id, err).await;
            }
        },
        ClientMessage::AbortGameplay => {
            if let Err(err) = coordinator.abort_gameplay(room_id, user_id).await {
                send_error(state, user_id, err).await;
            }
        },
        ClientMessage::TransferHost { new_host_id } => {
            if let Err(err) = coordinator.transfer_host(room_id, user_id, new_host_id).await {
                send_error(state, user_id, err).await;
            }
        },
        ClientMessage::KickUser { user_id: target_user_id } => {
            if let Err(err) = coordinator.kick_user(room_id, user_id, target_user_id).await {
                send_error(state, user_id, err).await;
            }
        },
        ClientMessage::AddPlaylistItem { item } => {
            if let Err(err) = coordinator.add_playlist_item(room_id, user_id, item).await {
                send_error(state, user_id, err).await;
            }
        },
        ClientMessage::EditPlaylistItem { item_id, item } => {
            if let Err(err) = coordinator.edit_playlist_item(room_id, user_id, item_id, item).await {
                send_error(state, user_id, err).await;
            }
        },
        ClientMessage::RemovePlaylistItem { item_id } => {
            if let Err(err) = coordinator.remove_playlist_item(room_id, user_id, item_id).await {
                send_error(state, user_id, err).await;
            }
        },
        ClientMessage::InvitePlayer { user_id: target_user_id } => {
            if let Err(err) = coordinator.invite_player(room_id, user_id, target_user_id).await {
                send_error(state, user_id, err).await;
            }
        },
    }
}
