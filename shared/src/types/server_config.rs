use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),
}

// ---------------------------------------------------------------------------
// Server config structs
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub bind: String,
    #[serde(default = "default_admin_port")]
    pub port_admin: Option<u16>,
    #[serde(default = "default_client_port")]
    pub port_client: Option<u16>,
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
    /// Upper bound for a single admin request, in seconds.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct DatabaseConfig {
    #[serde(default = "default_database_url")]
    pub url: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AuthConfig {
    /// Bearer token the admin surface compares against.
    ///
    /// Prefer the `ADMIN_TOKEN` environment variable; this field is the
    /// fallback. **Hot-reload safe:** yes, read per request.
    pub admin_token: Option<String>,
}

#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct RealtimeConfig {
    /// Capacity of the SSE broadcast channel; slower receivers lag past it.
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
    #[serde(default = "default_keepalive")]
    pub keepalive_secs: u64,
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            channel_capacity: default_channel_capacity(),
            keepalive_secs: default_keepalive(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub auth: AuthConfig,
    #[serde(default)]
    pub realtime: RealtimeConfig,
}

// ---------------------------------------------------------------------------
// Client config structs
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize, Clone)]
pub struct ApiConfig {
    pub base_url: String,
    #[serde(default)]
    pub admin_url: Option<String>,
    #[serde(default)]
    pub admin_token: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RefreshConfig {
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
    #[serde(default = "default_refresh_timeout_ms")]
    pub timeout_ms: u64,
    /// Delay before the SSE bridge reconnects after losing its stream.
    #[serde(default = "default_reconnect_ms")]
    pub reconnect_ms: u64,
}

impl Default for RefreshConfig {
    fn default() -> Self {
        Self {
            debounce_ms: default_debounce_ms(),
            timeout_ms: default_refresh_timeout_ms(),
            reconnect_ms: default_reconnect_ms(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ClientConfig {
    pub api: ApiConfig,
    #[serde(default)]
    pub refresh: RefreshConfig,
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

impl ServerConfig {
    /// Full bind address for the user-facing server, e.g. `"0.0.0.0:1337"`
    pub fn client_addr(&self) -> String {
        format!("{}:{}", self.bind, self.port_client.unwrap_or(1337))
    }

    /// Full bind address for the admin server, e.g. `"0.0.0.0:1338"`
    pub fn admin_addr(&self) -> String {
        format!("{}:{}", self.bind, self.port_admin.unwrap_or(1338))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

impl DatabaseConfig {
    /// `DATABASE_URL` wins over the config file.
    pub fn resolved_url(&self) -> String {
        std::env::var("DATABASE_URL")
            .ok()
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| self.url.clone())
    }
}

impl AuthConfig {
    /// Resolve the admin token with `ADMIN_TOKEN` env-var taking priority over
    /// the config file field.
    pub fn resolved_admin_token(&self) -> Option<String> {
        std::env::var("ADMIN_TOKEN")
            .ok()
            .filter(|s| !s.is_empty())
            .or_else(|| self.admin_token.clone())
            .filter(|s| !s.is_empty())
    }
}

impl RealtimeConfig {
    pub fn keepalive(&self) -> Duration {
        Duration::from_secs(self.keepalive_secs)
    }
}

impl RefreshConfig {
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_ms)
    }
}

impl ApiConfig {
    /// Admin surface URL; falls back to the public base URL.
    pub fn admin_base(&self) -> &str {
        self.admin_url.as_deref().unwrap_or(&self.base_url)
    }
}

// ---------------------------------------------------------------------------
// Serde defaults
// ---------------------------------------------------------------------------

pub fn default_admin_port() -> Option<u16> {
    Some(1338)
}

pub fn default_client_port() -> Option<u16> {
    Some(1337)
}

pub fn default_max_connections() -> usize {
    1000
}

pub fn default_request_timeout() -> u64 {
    15
}

pub fn default_database_url() -> String {
    "sqlite://sports.db?mode=rwc".to_string()
}

pub fn default_channel_capacity() -> usize {
    256
}

pub fn default_keepalive() -> u64 {
    15
}

pub fn default_debounce_ms() -> u64 {
    300
}

pub fn default_refresh_timeout_ms() -> u64 {
    10_000
}

pub fn default_reconnect_ms() -> u64 {
    3_000
}
