use serde::Deserialize;

/// Top-level server configuration, loaded from `tempo.toml`.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub listen_addr: String,
    pub auth: AuthFileConfig,
    pub limits: LimitsConfig,
    pub rooms: RoomsConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:8080".to_string(),
            auth: AuthFileConfig::default(),
            limits: LimitsConfig::default(),
            rooms: RoomsConfig::default(),
        }
    }
}

/// Infrastructure limits (connection caps, buffer sizes, rate limits).
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    pub max_ws_connections: usize,
    /// Maximum concurrent WebSocket connections per IP address.
    pub max_ws_per_ip: usize,
    pub ws_rate_limit_per_sec: f64,
    /// Bounded channel capacity for outbound per-connection messages.
    pub player_message_buffer: usize,
    /// API endpoint rate limit: max burst tokens per IP.
    pub api_rate_limit_burst: usize,
    /// API endpoint rate limit: token refill rate (requests per second) per IP.
    pub api_rate_limit_per_sec: f64,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_ws_connections: 2000,
            max_ws_per_ip: 10,
            ws_rate_limit_per_sec: 50.0,
            player_message_buffer: 256,
            api_rate_limit_burst: 20,
            api_rate_limit_per_sec: 2.0, // ~120 req/min
        }
    }
}

/// Room lifecycle configuration (idle-room reaping).
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RoomsConfig {
    pub idle_timeout_secs: u64,
    pub idle_check_interval_secs: u64,
    /// Default auto-start countdown duration applied to new rooms, in
    /// seconds. `0` disables auto-start by default.
    pub default_auto_start_secs: u64,
}

impl Default for RoomsConfig {
    fn default() -> Self {
        Self {
            idle_timeout_secs: 3600,
            idle_check_interval_secs: 60,
            default_auto_start_secs: 0,
        }
    }
}

/// Auth section of the config file.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AuthFileConfig {
    pub bearer_token: Option<String>,
}

impl Default for AuthFileConfig {
    fn default() -> Self {
        Self { bearer_token: None }
    }
}

impl ServerConfig {
    /// Validate configuration, logging errors and exiting on anything that
    /// would leave the server in an unsafe or non-functional state.
    pub fn validate(&self) {
        if self.listen_addr.parse::<std::net::SocketAddr>().is_err() {
            tracing::error!(
                addr = %self.listen_addr,
                "listen_addr is not a valid socket address"
            );
            std::process::exit(1);
        }

        if self.auth.bearer_token.is_some() {
            tracing::warn!(
                "bearer_token is set in config file — use TEMPO_API_TOKEN env var in production"
            );
        }

        if self.limits.max_ws_connections == 0 {
            tracing::error!("limits.max_ws_connections must be > 0");
            std::process::exit(1);
        }
        if self.limits.max_ws_per_ip == 0 {
            tracing::error!("limits.max_ws_per_ip must be > 0");
            std::process::exit(1);
        }
        if self.limits.ws_rate_limit_per_sec <= 0.0 {
            tracing::error!("limits.ws_rate_limit_per_sec must be > 0");
            std::process::exit(1);
        }
        if self.limits.player_message_buffer == 0 {
            tracing::error!("limits.player_message_buffer must be > 0");
            std::process::exit(1);
        }

        if self.rooms.idle_timeout_secs == 0 {
            tracing::error!("rooms.idle_timeout_secs must be > 0");
            std::process::exit(1);
        }
        if self.rooms.idle_check_interval_secs == 0 {
            tracing::error!("rooms.idle_check_interval_secs must be > 0");
            std::process::exit(1);
        }
    }

    /// Load config from `tempo.toml` if it exists, then apply env var
    /// overrides.
    pub fn load() -> Self {
        let mut config = match std::fs::read_to_string("tempo.toml") {
            Ok(content) => match toml::from_str::<ServerConfig>(&content) {
                Ok(cfg) => {
                    tracing::info!("loaded configuration from tempo.toml");
                    cfg
                },
                Err(e) => {
                    tracing::warn!("failed to parse tempo.toml: {e}, using defaults");
                    ServerConfig::default()
                },
            },
            Err(_) => {
                tracing::info!("no tempo.toml found, using defaults");
                ServerConfig::default()
            },
        };

        if let Ok(addr) = std::env::var("TEMPO_LISTEN_ADDR")
            && !addr.is_empty()
        {
            config.listen_addr = addr;
        }
        if let Ok(token) = std::env::var("TEMPO_API_TOKEN")
            && !token.is_empty()
        {
            config.auth.bearer_token = Some(token);
        }
        if let Ok(val) = std::env::var("TEMPO_MAX_WS_CONNECTIONS")
            && let Ok(n) = val.parse::<usize>()
        {
            config.limits.max_ws_connections = n;
        }
        if let Ok(val) = std::env::var("TEMPO_MAX_WS_PER_IP")
            && let Ok(n) = val.parse::<usize>()
        {
            config.limits.max_ws_per_ip = n;
        }
        if let Ok(val) = std::env::var("TEMPO_WS_RATE_LIMIT")
            && let Ok(n) = val.parse::<f64>()
        {
            config.limits.ws_rate_limit_per_sec = n;
        }

        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_values() {
        let cfg = ServerConfig::default();
        assert_eq!(cfg.listen_addr, "0.0.0.0:8080");
        assert!(cfg.auth.bearer_token.is_none());
    }

    #[test]
    fn parse_minimal_toml() {
        let toml_str = r#"
listen_addr = "127.0.0.1:9090"

[auth]
bearer_token = "secret123"
"#;
        let cfg: ServerConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(cfg.listen_addr, "127.0.0.1:9090");
        assert_eq!(cfg.auth.bearer_token.as_deref(), Some("secret123"));
    }

    #[test]
    fn validate_accepts_valid_config() {
        let cfg = ServerConfig::default();
        cfg.validate();
    }

    #[test]
    fn validate_rejects_invalid_addr() {
        let cfg = ServerConfig {
            listen_addr: "not-an-address".to_string(),
            ..ServerConfig::default()
        };
        assert!(cfg.listen_addr.parse::<std::net::SocketAddr>().is_err());
    }

    #[test]
    fn default_limits_config() {
        let cfg = LimitsConfig::default();
        assert_eq!(cfg.max_ws_connections, 2000);
        assert_eq!(cfg.max_ws_per_ip, 10);
        assert!((cfg.ws_rate_limit_per_sec - 50.0).abs() < f64::EPSILON);
        assert_eq!(cfg.player_message_buffer, 256);
    }

    #[test]
    fn default_rooms_config() {
        let cfg = RoomsConfig::default();
        assert_eq!(cfg.idle_timeout_secs, 3600);
        assert_eq!(cfg.idle_check_interval_secs, 60);
    }

    #[test]
    fn parse_limits_toml() {
        let toml_str = r#"
[limits]
max_ws_connections = 500
max_ws_per_ip = 20
ws_rate_limit_per_sec = 100.0
player_message_buffer = 512

[rooms]
idle_timeout_secs = 7200
idle_check_interval_secs = 120
"#;
        let cfg: ServerConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(cfg.limits.max_ws_connections, 500);
        assert_eq!(cfg.limits.max_ws_per_ip, 20);
        assert!((cfg.limits.ws_rate_limit_per_sec - 100.0).abs() < f64::EPSILON);
        assert_eq!(cfg.limits.player_message_buffer, 512);
        assert_eq!(cfg.rooms.idle_timeout_secs, 7200);
        assert_eq!(cfg.rooms.idle_check_interval_secs, 120);
    }

    #[test]
    fn missing_limits_uses_defaults() {
        let toml_str = r#"
listen_addr = "0.0.0.0:8080"
"#;
        let cfg: ServerConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(cfg.limits.max_ws_connections, 2000);
        assert_eq!(cfg.rooms.idle_timeout_secs, 3600);
    }
}
