use tracing_subscriber::EnvFilter;

use tempo_server::config::ServerConfig;
use tempo_server::{build_app, spawn_idle_room_cleanup, spawn_rate_limit_cleanup};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let config = ServerConfig::load();
    config.validate();
    let listen_addr = config.listen_addr.clone();

    let (app, state) = build_app(config);

    spawn_idle_room_cleanup(state.clone());
    spawn_rate_limit_cleanup(state);

    let listener = tokio::net::TcpListener::bind(&listen_addr)
        .await
        .unwrap_or_else(|e| panic!("failed to bind to {listen_addr}: {e}"));

    tracing::info!("tempo server listening on {listen_addr}");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<std::net::SocketAddr>(),
    )
    .await
    .expect("server error");
}
