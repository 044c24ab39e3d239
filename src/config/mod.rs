use serde::Deserialize;

/// Environment-driven configuration shared by all four binaries.
///
/// `DATABASE_URL`, `REDIS_URL` and `JWT_SECRET` are required; a missing one
/// fails [`AppConfig::load`] and the process exits non-zero. Everything else
/// has conventional defaults.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_environment")]
    pub environment: String,

    /// HTTP API listen port.
    #[serde(default = "default_port")]
    pub port: u16,

    /// WebSocket relay listen port.
    #[serde(default = "default_ws_port")]
    pub ws_port: u16,

    pub database_url: String,

    pub redis_url: String,

    pub jwt_secret: String,

    #[serde(default = "default_jwt_expiry")]
    pub jwt_expiry_seconds: u64,

    /// Markets the engine hosts (comma-separated, e.g. "SOL_USDC,ETH_USDC").
    #[serde(default = "default_markets")]
    pub markets: String,

    /// How long the front-end waits for an engine reply before reporting a
    /// submission timeout.
    #[serde(default = "default_engine_reply_timeout_ms")]
    pub engine_reply_timeout_ms: u64,

    /// Per-client send buffer on the stream relay; a client that falls this
    /// far behind is disconnected.
    #[serde(default = "default_ws_client_buffer")]
    pub ws_client_buffer: usize,
}

fn default_environment() -> String {
    "development".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_ws_port() -> u16 {
    8081
}

fn default_jwt_expiry() -> u64 {
    86400 // 24 hours
}

fn default_markets() -> String {
    "SOL_USDC".to_string()
}

fn default_engine_reply_timeout_ms() -> u64 {
    5000
}

fn default_ws_client_buffer() -> usize {
    256
}

impl AppConfig {
    pub fn load() -> anyhow::Result<Self> {
        let config = config::Config::builder()
            .add_source(config::Environment::default())
            .build()?;

        let app_config: AppConfig = config.try_deserialize()?;
        Ok(app_config)
    }

    /// The configured market list, trimmed and upper-cased.
    pub fn market_list(&self) -> Vec<String> {
        self.markets
            .split(',')
            .map(|s| s.trim().to_uppercase())
            .filter(|s| !s.is_empty())
            .collect()
    }

    pub fn engine_reply_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.engine_reply_timeout_ms)
    }
}
