pub mod auth;
pub mod broadcast;
pub mod config;
pub mod connection;
pub mod coordinator;
pub mod countdown;
pub mod entity_store;
pub mod error;
pub mod health;
pub mod persistence;
pub mod rate_limit;
pub mod state;
pub mod ws;

use std::net::SocketAddr;
use std::time::Duration;

use axum::Router;
use axum::extract::ConnectInfo;
use axum::middleware;
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};
use tower_http::set_header::SetResponseHeaderLayer;
use tower_http::timeout::TimeoutLayer;

use config::ServerConfig;
use state::AppState;

/// Build the Axum router and application state from a config.
pub fn build_app(config: ServerConfig) -> (Router<()>, AppState) {
    build_app_with_state(AppState::new(config))
}

/// Like `build_app`, but against a caller-supplied persistence adapter —
/// used by integration tests to seed rooms before any client connects.
pub fn build_app_with_persistence(
    config: ServerConfig,
    persistence: std::sync::Arc<dyn persistence::Persistence>,
) -> (Router<()>, AppState) {
    build_app_with_state(AppState::with_persistence(config, persistence))
}

fn build_app_with_state(state: AppState) -> (Router<()>, AppState) {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = Router::new()
        .route("/ws", axum::routing::get(ws::ws_handler))
        .route("/health", axum::routing::get(health::health_check))
        .route("/health/ready", axum::routing::get(health::readiness_check))
        .layer(middleware::from_fn_with_state(state.clone(), api_rate_limit_layer))
        .layer(ServiceBuilder::new().layer(TimeoutLayer::with_status_code(
            axum::http::StatusCode::REQUEST_TIMEOUT,
            Duration::from_secs(30),
        )))
        .layer(cors)
        .layer(SetResponseHeaderLayer::overriding(
            axum::http::header::X_FRAME_OPTIONS,
            axum::http::HeaderValue::from_static("DENY"),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            axum::http::header::X_CONTENT_TYPE_OPTIONS,
            axum::http::HeaderValue::from_static("nosniff"),
        ))
        .with_state(state.clone());

    (app, state)
}

/// Background task that periodically evicts rooms with no recorded
/// activity past `rooms.idle_timeout_secs`.
pub fn spawn_idle_room_cleanup(state: AppState) {
    let check_interval = state.config.rooms.idle_check_interval_secs;
    let idle_timeout = Duration::from_secs(state.config.rooms.idle_timeout_secs);
    let shutdown = state.shutdown.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(check_interval));
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    tracing::info!("idle room cleanup shutting down");
                    break;
                }
                _ = interval.tick() => {
                    let reaped = state.coordinator.evict_idle_rooms(idle_timeout).await;
                    if reaped > 0 {
                        tracing::info!(reaped, "evicted idle rooms");
                    }
                }
            }
        }
    });
}

/// Middleware that enforces per-IP rate limiting on the `/ws` upgrade and
/// any future REST endpoints.
async fn api_rate_limit_layer(
    axum::extract::State(state): axum::extract::State<AppState>,
    request: axum::extract::Request,
    next: middleware::Next,
) -> Result<axum::response::Response, axum::http::StatusCode> {
    if request.uri().path() == "/health" || request.uri().path() == "/health/ready" {
        return Ok(next.run(request).await);
    }
    let ip = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ci| ci.0.ip())
        .unwrap_or(std::net::IpAddr::V4(std::net::Ipv4Addr::LOCALHOST));
    if !state.api_rate_limiter.check_rate_limit(ip).await {
        tracing::warn!(%ip, "rate limit exceeded");
        return Err(axum::http::StatusCode::TOO_MANY_REQUESTS);
    }
    Ok(next.run(request).await)
}

/// Background task that periodically cleans up stale rate limiter entries.
pub fn spawn_rate_limit_cleanup(state: AppState) {
    let shutdown = state.shutdown.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(300));
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    tracing::info!("rate limiter cleanup shutting down");
                    break;
                }
                _ = interval.tick() => {
                    state.api_rate_limiter.cleanup(Duration::from_secs(300)).await;
                }
            }
        }
    });
}
