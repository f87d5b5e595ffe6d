use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use tokio_util::sync::CancellationToken;

use crate::auth::AuthConfig;
use crate::broadcast::HubBroadcaster;
use crate::config::ServerConfig;
use crate::coordinator::RoomCoordinator;
use crate::persistence::{InMemoryPersistence, PermissiveRulesetRules, Persistence, RulesetRules};
use crate::rate_limit::IpRateLimiter;

/// Shared application state. `coordinator` is the single entry point for
/// every room/connection operation; `broadcaster` is held
/// alongside it so the websocket hub can register and unregister each
/// connection's outbound channel directly.
#[derive(Clone)]
pub struct AppState {
    pub coordinator: Arc<RoomCoordinator>,
    pub broadcaster: Arc<HubBroadcaster>,
    pub auth: AuthConfig,
    pub config: Arc<ServerConfig>,
    pub ws_connection_count: Arc<AtomicUsize>,
    pub api_rate_limiter: Arc<IpRateLimiter>,
    pub ws_per_ip: Arc<std::sync::Mutex<HashMap<IpAddr, usize>>>,
    pub shutdown: CancellationToken,
}

impl AppState {
    pub fn new(config: ServerConfig) -> Self {
        let persistence: Arc<dyn Persistence> = Arc::new(InMemoryPersistence::new());
        Self::with_persistence(config, persistence)
    }

    /// Build state against a caller-supplied persistence adapter, bypassing
    /// the default in-memory one. Used by integration tests to seed rooms
    /// before connecting any websocket clients.
    pub fn with_persistence(config: ServerConfig, persistence: Arc<dyn Persistence>) -> Self {
        let auth = AuthConfig {
            bearer_token: config.auth.bearer_token.clone(),
        };
        let api_rate_limiter = Arc::new(IpRateLimiter::new(
            config.limits.api_rate_limit_burst as f64,
            config.limits.api_rate_limit_per_sec,
        ));
        let broadcaster = Arc::new(HubBroadcaster::new());
        let rules: Arc<dyn RulesetRules> = Arc::new(PermissiveRulesetRules);
        let coordinator = RoomCoordinator::new(persistence, broadcaster.clone(), rules);
        Self {
            coordinator,
            broadcaster,
            auth,
            config: Arc::new(config),
            ws_connection_count: Arc::new(AtomicUsize::new(0)),
            api_rate_limiter,
            ws_per_ip: Arc::new(std::sync::Mutex::new(HashMap::new())),
            shutdown: CancellationToken::new(),
        }
    }
}

/// RAII guard that decrements a counter on drop.
pub struct ConnectionGuard {
    counter: Arc<AtomicUsize>,
}

impl ConnectionGuard {
    pub fn new(counter: Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::Relaxed);
        Self { counter }
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.counter.fetch_sub(1, Ordering::Relaxed);
    }
}

/// RAII guard that tracks per-IP WebSocket connection count.
/// Uses a synchronous `std::sync::Mutex` so the counter can be decremented
/// safely in the `Drop` impl without spawning an async task. This avoids a
/// race condition where the spawned task might not run (e.g. during shutdown)
/// causing the counter to leak.
pub struct IpConnectionGuard {
    ip: IpAddr,
    ws_per_ip: Arc<std::sync::Mutex<HashMap<IpAddr, usize>>>,
}

impl IpConnectionGuard {
    /// Attempt to acquire a per-IP connection slot. Returns `None` if the
    /// limit is exceeded.
    pub fn try_acquire(
        ip: IpAddr,
        ws_per_ip: Arc<std::sync::Mutex<HashMap<IpAddr, usize>>>,
        max_per_ip: usize,
    ) -> Option<Self> {
        let mut map = ws_per_ip.lock().ok()?;
        let count = map.entry(ip).or_insert(0);
        if *count >= max_per_ip {
            return None;
        }
        *count += 1;
        drop(map);
        Some(Self { ip, ws_per_ip })
    }
}

impl Drop for IpConnectionGuard {
    fn drop(&mut self) {
        if let Ok(mut map) = self.ws_per_ip.lock()
            && let Some(count) = map.get_mut(&self.ip)
        {
            *count = count.saturating_sub(1);
            if *count == 0 {
                map.remove(&self.ip);
            }
        }
    }
}
