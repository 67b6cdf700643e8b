use clap::{Parser, ValueEnum};
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment, Provider,
};
use serde::{Deserialize, Serialize};

/// Command-line flags. Every field is optional so that only values actually
/// given on the command line (or through their env var) reach the top layer.
#[derive(Parser, Serialize, Debug, Default)]
#[command(name = "relay-server", version, about = "Subscription-gated chat relay")]
pub struct Cli {
    /// Port to listen on [default: 8080]
    #[arg(long, env = "RELAY_PORT")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,

    /// Bind address [default: 0.0.0.0]
    #[arg(long, env = "RELAY_BIND_ADDRESS")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bind_address: Option<String>,

    /// Path to TOML config file [default: ./relay.toml]
    #[arg(long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub config: Option<String>,

    /// Enable structured JSON logging (for Docker/production)
    #[arg(long, env = "RELAY_JSON_LOGS")]
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub json_logs: bool,

    /// Output a commented TOML config template and exit
    #[arg(long)]
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub generate_config: bool,

    /// Data directory for the SQLite database [default: ./data]
    #[arg(long, env = "RELAY_DATA_DIR")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_dir: Option<String>,

    /// Storage backend for subscriptions and the broker outbox [default: sqlite]
    #[arg(long, env = "RELAY_STORAGE", value_enum)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub storage: Option<StorageBackend>,

    /// Queue name stamped on every published payload [default: chats-queue]
    #[arg(long, env = "RELAY_QUEUE_NAME")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub queue_name: Option<String>,

    /// What the gateway writes into the per-chat subscription set [default: chat-id]
    #[arg(long, env = "RELAY_CHAT_SET_MEMBERS", value_enum)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chat_set_members: Option<ChatSetMembers>,
}

/// Resolved server configuration.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct Config {
    pub port: u16,
    pub bind_address: String,
    pub config: String,
    pub json_logs: bool,
    pub generate_config: bool,
    pub data_dir: String,
    pub storage: StorageBackend,
    pub queue_name: String,
    pub chat_set_members: ChatSetMembers,

    /// Dispatch limits (loaded from [dispatch] section in TOML)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dispatch: Option<DispatchConfig>,

    /// WebSocket keepalive (loaded from [keepalive] section in TOML)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub keepalive: Option<KeepaliveConfig>,

    /// Broker outbox retention (loaded from [outbox] section in TOML)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outbox: Option<OutboxConfig>,
}

#[derive(ValueEnum, Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum StorageBackend {
    /// SQLite file under data_dir (durable)
    Sqlite,
    /// Process memory (lost on restart)
    Memory,
}

/// Member recorded in `chat:subscriptions:<chat_id>` by the subscription gateway.
/// The set is never consulted for authorization.
#[derive(ValueEnum, Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum ChatSetMembers {
    /// The chat's own id (layout already present in existing stores)
    ChatId,
    /// The subscribing user's id
    UserId,
}

/// Bounds for the fire-and-forget dispatch paths.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchConfig {
    /// Outbound frames buffered per connection before deliveries are dropped (default: 256)
    #[serde(default = "default_connection_queue_capacity")]
    pub connection_queue_capacity: usize,

    /// Broker publishes buffered before new ones are dropped (default: 1024)
    #[serde(default = "default_publish_queue_capacity")]
    pub publish_queue_capacity: usize,

    /// Number of broker publish workers (default: 4)
    #[serde(default = "default_publish_workers")]
    pub publish_workers: usize,

    /// Concurrent subscription lookups during one broadcast (default: 32)
    #[serde(default = "default_fanout_concurrency")]
    pub fanout_concurrency: usize,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            connection_queue_capacity: default_connection_queue_capacity(),
            publish_queue_capacity: default_publish_queue_capacity(),
            publish_workers: default_publish_workers(),
            fanout_concurrency: default_fanout_concurrency(),
        }
    }
}

fn default_connection_queue_capacity() -> usize {
    256
}

fn default_publish_queue_capacity() -> usize {
    1024
}

fn default_publish_workers() -> usize {
    4
}

fn default_fanout_concurrency() -> usize {
    32
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeepaliveConfig {
    /// Seconds between server pings (default: 30)
    #[serde(default = "default_ping_interval")]
    pub ping_interval_secs: u64,

    /// Seconds to wait for a pong before closing (default: 10)
    #[serde(default = "default_pong_timeout")]
    pub pong_timeout_secs: u64,
}

impl Default for KeepaliveConfig {
    fn default() -> Self {
        Self {
            ping_interval_secs: default_ping_interval(),
            pong_timeout_secs: default_pong_timeout(),
        }
    }
}

fn default_ping_interval() -> u64 {
    30
}

fn default_pong_timeout() -> u64 {
    10
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboxConfig {
    /// Days to keep published payloads in the outbox (default: 7)
    #[serde(default = "default_retention_days")]
    pub retention_days: u32,

    /// Interval in seconds between purge runs (default: 3600 = 1 hour)
    #[serde(default = "default_cleanup_interval")]
    pub cleanup_interval_secs: u64,
}

impl Default for OutboxConfig {
    fn default() -> Self {
        Self {
            retention_days: default_retention_days(),
            cleanup_interval_secs: default_cleanup_interval(),
        }
    }
}

fn default_retention_days() -> u32 {
    7
}

fn default_cleanup_interval() -> u64 {
    3600
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 8080,
            bind_address: "0.0.0.0".to_string(),
            config: "./relay.toml".to_string(),
            json_logs: false,
            generate_config: false,
            data_dir: "./data".to_string(),
            storage: StorageBackend::Sqlite,
            queue_name: "chats-queue".to_string(),
            chat_set_members: ChatSetMembers::ChatId,
            dispatch: None,
            keepalive: None,
            outbox: None,
        }
    }
}

impl Config {
    pub fn dispatch(&self) -> DispatchConfig {
        self.dispatch.clone().unwrap_or_default()
    }

    pub fn keepalive(&self) -> KeepaliveConfig {
        self.keepalive.clone().unwrap_or_default()
    }

    pub fn outbox(&self) -> OutboxConfig {
        self.outbox.clone().unwrap_or_default()
    }

    /// Load config with layered precedence:
    /// built-in defaults < TOML file < env vars (RELAY_*) < CLI args
    pub fn load() -> Result<Self, figment::Error> {
        let cli = Cli::parse();
        let config_path = cli
            .config
            .clone()
            .unwrap_or_else(|| Config::default().config);
        Self::layered(Toml::file(config_path), cli)
    }

    /// Layer `toml` and `cli` over the built-in defaults.
    pub fn layered(toml: impl Provider, cli: Cli) -> Result<Self, figment::Error> {
        Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(toml)
            .merge(Env::prefixed("RELAY_").split("__"))
            .merge(Serialized::defaults(cli))
            .extract()
    }
}

/// Generate a commented TOML config template
pub fn generate_config_template() -> String {
    r#"# Chat Relay Server Configuration
# Place this file at ./relay.toml or specify with --config <path>
# All settings can be overridden via environment variables (RELAY_PORT, etc.)
# or CLI flags (--port, etc.)

# Server port (default: 8080)
# port = 8080

# Bind address (default: 0.0.0.0 - all interfaces)
# bind_address = "0.0.0.0"

# Enable structured JSON logging for Docker/production
# json_logs = false

# Data directory for the SQLite database
# data_dir = "./data"

# Storage backend: "sqlite" (durable) or "memory"
# storage = "sqlite"

# Queue name recorded with each published message
# queue_name = "chats-queue"

# Member written to chat:subscriptions:<chat_id> by POST /subscribe:
# "chat-id" (the chat id itself) or "user-id" (the subscriber)
# chat_set_members = "chat-id"

# ---- Dispatch limits ----
# [dispatch]
# connection_queue_capacity = 256  # frames buffered per connection
# publish_queue_capacity = 1024    # broker publishes buffered
# publish_workers = 4              # broker worker pool size
# fanout_concurrency = 32          # concurrent subscription lookups per broadcast

# ---- WebSocket keepalive ----
# [keepalive]
# ping_interval_secs = 30
# pong_timeout_secs = 10

# ---- Broker outbox ----
# [outbox]
# retention_days = 7
# cleanup_interval_secs = 3600
"#
    .to_string()
}
