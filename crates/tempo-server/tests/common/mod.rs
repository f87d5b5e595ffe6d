use std::net::SocketAddr;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use tempo_core::ids::{HubKind, RoomId, UserId};
use tempo_core::match_type::MatchTypeKind;
use tempo_core::net::messages::{ClientMessage, ServerMessage};
use tempo_core::playlist::QueueMode;
use tempo_core::room::RoomSettings;

use tempo_server::config::ServerConfig;
use tempo_server::persistence::{InMemoryPersistence, PersistedRoom};
use tempo_server::{build_app_with_persistence, spawn_idle_room_cleanup, spawn_rate_limit_cleanup};

pub type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

pub struct TestServer {
    pub addr: SocketAddr,
    pub persistence: std::sync::Arc<InMemoryPersistence>,
    _shutdown: tokio::task::JoinHandle<()>,
}

pub fn default_room_settings(name: &str) -> RoomSettings {
    RoomSettings {
        name: name.to_string(),
        password: None,
        match_type: MatchTypeKind::HeadToHead,
        queue_mode: QueueMode::HostOnly,
        auto_start_duration: None,
    }
}

impl TestServer {
    pub async fn new() -> Self {
        Self::from_config(ServerConfig::default()).await
    }

    async fn from_config(config: ServerConfig) -> Self {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let persistence = std::sync::Arc::new(InMemoryPersistence::new());
        let (app, state) = build_app_with_persistence(config, persistence.clone());
        spawn_idle_room_cleanup(state.clone());
        spawn_rate_limit_cleanup(state);

        let handle = tokio::spawn(async move {
            axum::serve(
                listener,
                app.into_make_service_with_connect_info::<SocketAddr>(),
            )
            .await
            .unwrap();
        });

        tokio::time::sleep(Duration::from_millis(20)).await;

        Self { addr, persistence, _shutdown: handle }
    }

    /// Seed a room with a host and default permissive settings, returning
    /// its id.
    pub async fn seed_room(&self, room_id: RoomId, host_user_id: UserId) {
        self.persistence
            .seed_room(
                room_id,
                PersistedRoom {
                    settings: default_room_settings(&format!("room-{room_id}")),
                    host_user_id,
                },
            )
            .await;
    }

    pub fn ws_url(&self, user_id: UserId, token: &str, hub: HubKind) -> String {
        let hub = match hub {
            HubKind::Multiplayer => "Multiplayer",
            HubKind::Spectator => "Spectator",
        };
        format!("ws://{}/ws?user_id={user_id}&token={token}&hub={hub}", self.addr)
    }
}

/// Connect to the multiplayer hub as `user_id`, using `user_id` itself as
/// the token id unless the caller needs a distinct reconnecting-client
/// scenario (use `ws_connect_as` for that).
pub async fn ws_connect(server: &TestServer, user_id: UserId) -> WsStream {
    ws_connect_as(server, user_id, &format!("tok-{user_id}")).await
}

pub async fn ws_connect_as(server: &TestServer, user_id: UserId, token: &str) -> WsStream {
    let url = server.ws_url(user_id, token, HubKind::Multiplayer);
    let (stream, _) = tokio_tungstenite::connect_async(url).await.unwrap();
    stream
}

pub async fn send(stream: &mut WsStream, msg: &ClientMessage) {
    let encoded = rmp_serde::to_vec_named(msg).unwrap();
    stream.send(Message::Binary(encoded.into())).await.unwrap();
}

/// Read the next `ServerMessage`, skipping anything that isn't binary
/// (5s timeout).
pub async fn recv(stream: &mut WsStream) -> ServerMessage {
    let deadline = Duration::from_secs(5);
    tokio::time::timeout(deadline, async {
        loop {
            match stream.next().await {
                Some(Ok(Message::Binary(data))) => return rmp_serde::from_slice(&data).unwrap(),
                Some(Ok(Message::Close(_))) => panic!("websocket closed unexpectedly"),
                Some(Err(e)) => panic!("websocket error: {e}"),
                None => panic!("websocket stream ended"),
                _ => continue,
            }
        }
    })
    .await
    .expect("timed out waiting for a server message")
}

/// Like `recv`, but returns `None` instead of panicking on timeout —
/// for asserting that a message was *not* sent.
pub async fn try_recv(stream: &mut WsStream, timeout_ms: u64) -> Option<ServerMessage> {
    let deadline = Duration::from_millis(timeout_ms);
    tokio::time::timeout(deadline, async {
        loop {
            match stream.next().await {
                Some(Ok(Message::Binary(data))) => return rmp_serde::from_slice(&data).unwrap(),
                _ => continue,
            }
        }
    })
    .await
    .ok()
}

pub async fn join_room(stream: &mut WsStream, room_id: RoomId) -> ServerMessage {
    send(stream, &ClientMessage::JoinRoom { room_id, password: None }).await;
    recv(stream).await
}
