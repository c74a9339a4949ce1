//! Server configuration loading from file and environment variables.

use serde::Deserialize;
use std::net::{IpAddr, Ipv4Addr};
use thiserror::Error;

/// Top-level server configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// Server network settings.
    #[serde(default)]
    pub server: ServerConfig,

    /// Database settings.
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Upstream realtime service settings.
    #[serde(default)]
    pub upstream: UpstreamSettings,

    /// Per-session timer and persistence settings.
    #[serde(default)]
    pub session: SessionSettings,

    /// Client authentication settings.
    #[serde(default)]
    pub auth: AuthSettings,

    /// Tool handler settings.
    #[serde(default)]
    pub tools: ToolSettings,
}

/// Network configuration for the HTTP server.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Host address to bind to.
    #[serde(default = "default_host")]
    pub host: IpAddr,

    /// Port to listen on.
    #[serde(default = "default_port")]
    pub port: u16,
}

/// Database configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// Path to the SQLite database file.
    #[serde(default = "default_db_path")]
    pub path: String,

    /// Busy timeout for SQLite connections, in milliseconds.
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,

    /// Maximum number of pooled SQLite connections.
    #[serde(default = "default_pool_max_size")]
    pub pool_max_size: u32,
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level filter (e.g., "info", "parley_server=debug,info").
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Whether to output logs in JSON format.
    #[serde(default)]
    pub json: bool,
}

/// Upstream realtime service configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct UpstreamSettings {
    /// Full WebSocket URL of the realtime endpoint, model included.
    #[serde(default = "default_upstream_url")]
    pub url: String,

    /// Bearer credential for the upstream service. Usually supplied via
    /// `PARLEY_UPSTREAM_API_KEY` rather than the config file.
    #[serde(default)]
    pub api_key: String,

    /// Voice preset requested from the upstream service.
    #[serde(default = "default_voice")]
    pub voice: String,

    /// System instructions for the conversation.
    #[serde(default)]
    pub instructions: Option<String>,

    /// Bound on establishing the upstream connection, in seconds.
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,

    /// Application-level keepalive interval on the upstream leg, in seconds.
    #[serde(default = "default_heartbeat_secs")]
    pub heartbeat_interval_secs: u64,
}

/// Per-session timers and persistence bounds.
#[derive(Debug, Clone, Deserialize)]
pub struct SessionSettings {
    /// Idle threshold after which a session is force-closed, in seconds.
    #[serde(default = "default_idle_timeout_secs")]
    pub idle_timeout_secs: u64,

    /// Interval between transport pings to the client, in seconds.
    #[serde(default = "default_heartbeat_secs")]
    pub heartbeat_interval_secs: u64,

    /// Bound on each best-effort record write, in milliseconds.
    #[serde(default = "default_persist_timeout_ms")]
    pub persist_timeout_ms: u64,
}

impl SessionSettings {
    /// The watchdog configuration these settings describe.
    pub fn timer_config(&self) -> parley_voice::TimerConfig {
        parley_voice::TimerConfig {
            idle_timeout: std::time::Duration::from_secs(self.idle_timeout_secs),
            heartbeat_interval: std::time::Duration::from_secs(self.heartbeat_interval_secs),
        }
    }
}

/// Client authentication configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AuthSettings {
    /// Static API keys and the user each maps to.
    #[serde(default)]
    pub api_keys: Vec<ApiKeyEntry>,

    /// Optional secret for signing WebSocket session tokens. When unset a
    /// random per-process secret is derived, which invalidates outstanding
    /// tokens on restart (they live for a minute anyway).
    #[serde(default)]
    pub token_secret: Option<String>,

    /// Bound on credential verification during the handshake, in
    /// milliseconds.
    #[serde(default = "default_auth_timeout_ms")]
    pub verify_timeout_ms: u64,
}

/// One static API key.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiKeyEntry {
    pub key: String,
    pub user_id: String,
}

/// Tool handler configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ToolSettings {
    /// Bound on a single tool invocation, in seconds.
    #[serde(default = "default_tool_timeout_secs")]
    pub call_timeout_secs: u64,

    /// Search provider API key; the search tool reports itself
    /// unconfigured without one.
    #[serde(default)]
    pub search_api_key: Option<String>,

    /// Quote provider API key.
    #[serde(default)]
    pub stock_api_key: Option<String>,

    /// HTTP email API endpoint for document forwarding.
    #[serde(default = "default_email_endpoint")]
    pub email_endpoint: String,

    /// Email API key.
    #[serde(default)]
    pub email_api_key: Option<String>,

    /// Sender address for forwarded documents.
    #[serde(default = "default_email_from")]
    pub email_from: String,
}

fn default_host() -> IpAddr {
    IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1))
}

fn default_port() -> u16 {
    3000
}

fn default_db_path() -> String {
    "parley.db".to_string()
}

fn default_busy_timeout_ms() -> u64 {
    5_000
}

fn default_pool_max_size() -> u32 {
    8
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_upstream_url() -> String {
    "wss://api.openai.com/v1/realtime?model=gpt-4o-realtime-preview".to_string()
}

fn default_voice() -> String {
    "sage".to_string()
}

fn default_connect_timeout_secs() -> u64 {
    10
}

fn default_heartbeat_secs() -> u64 {
    30
}

fn default_idle_timeout_secs() -> u64 {
    600
}

fn default_persist_timeout_ms() -> u64 {
    2_000
}

fn default_auth_timeout_ms() -> u64 {
    2_000
}

fn default_tool_timeout_secs() -> u64 {
    10
}

fn default_email_endpoint() -> String {
    "https://api.resend.com/emails".to_string()
}

fn default_email_from() -> String {
    "assistant@parley.local".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
            busy_timeout_ms: default_busy_timeout_ms(),
            pool_max_size: default_pool_max_size(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

impl Default for UpstreamSettings {
    fn default() -> Self {
        Self {
            url: default_upstream_url(),
            api_key: String::new(),
            voice: default_voice(),
            instructions: None,
            connect_timeout_secs: default_connect_timeout_secs(),
            heartbeat_interval_secs: default_heartbeat_secs(),
        }
    }
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            idle_timeout_secs: default_idle_timeout_secs(),
            heartbeat_interval_secs: default_heartbeat_secs(),
            persist_timeout_ms: default_persist_timeout_ms(),
        }
    }
}

impl Default for ToolSettings {
    fn default() -> Self {
        Self {
            call_timeout_secs: default_tool_timeout_secs(),
            search_api_key: None,
            stock_api_key: None,
            email_endpoint: default_email_endpoint(),
            email_api_key: None,
            email_from: default_email_from(),
        }
    }
}

/// Errors that can occur when loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read the configuration file.
    #[error("failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),

    /// Failed to parse the configuration file.
    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Loads configuration from a TOML file, falling back to defaults.
///
/// Environment variable overrides:
/// - `PARLEY_HOST` overrides `server.host`
/// - `PARLEY_PORT` overrides `server.port`
/// - `PARLEY_DB_PATH` overrides `database.path`
/// - `PARLEY_LOG_LEVEL` overrides `logging.level`
/// - `PARLEY_LOG_JSON` overrides `logging.json` (set to "true" to enable)
/// - `PARLEY_UPSTREAM_URL` overrides `upstream.url`
/// - `PARLEY_UPSTREAM_API_KEY` overrides `upstream.api_key`
/// - `PARLEY_SEARCH_API_KEY` overrides `tools.search_api_key`
/// - `PARLEY_STOCK_API_KEY` overrides `tools.stock_api_key`
/// - `PARLEY_EMAIL_API_KEY` overrides `tools.email_api_key`
///
/// # Errors
///
/// Returns `ConfigError` if the file exists but cannot be read or parsed.
pub fn load_config(path: Option<&str>) -> Result<Config, ConfigError> {
    let mut config = match path {
        Some(p) => match std::fs::read_to_string(p) {
            Ok(contents) => toml::from_str(&contents)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = p, "config file not found, using defaults");
                Config::default()
            }
            Err(e) => return Err(ConfigError::FileRead(e)),
        },
        None => Config::default(),
    };

    // Environment variable overrides
    if let Ok(host) = std::env::var("PARLEY_HOST") {
        if let Ok(parsed) = host.parse() {
            config.server.host = parsed;
        }
    }
    if let Ok(port) = std::env::var("PARLEY_PORT") {
        if let Ok(parsed) = port.parse() {
            config.server.port = parsed;
        }
    }
    if let Ok(db_path) = std::env::var("PARLEY_DB_PATH") {
        config.database.path = db_path;
    }
    if let Ok(level) = std::env::var("PARLEY_LOG_LEVEL") {
        config.logging.level = level;
    }
    if let Ok(json) = std::env::var("PARLEY_LOG_JSON") {
        config.logging.json = json == "true" || json == "1";
    }
    if let Ok(url) = std::env::var("PARLEY_UPSTREAM_URL") {
        config.upstream.url = url;
    }
    if let Ok(key) = std::env::var("PARLEY_UPSTREAM_API_KEY") {
        config.upstream.api_key = key;
    }
    if let Ok(key) = std::env::var("PARLEY_SEARCH_API_KEY") {
        config.tools.search_api_key = Some(key);
    }
    if let Ok(key) = std::env::var("PARLEY_STOCK_API_KEY") {
        config.tools.stock_api_key = Some(key);
    }
    if let Ok(key) = std::env::var("PARLEY_EMAIL_API_KEY") {
        config.tools.email_api_key = Some(key);
    }

    Ok(config)
}
