//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the server.
//! All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};

use crate::websocket::frame::{Fragmentation, DEFAULT_CHUNK_SIZE};

/// Root configuration for the server.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ServerConfig {
    /// Listener configuration (bind address, connection limit).
    pub listener: ListenerConfig,

    /// HTTP request handling and static files.
    pub http: HttpConfig,

    /// Server-side sessions.
    pub session: SessionConfig,

    /// WebSocket broadcast groups policy.
    pub groups: GroupsConfig,

    /// WebSocket framing.
    pub websocket: WebSocketConfig,

    /// Defaults applied to response cookies.
    pub cookie: CookieConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    pub bind_address: String,

    /// Maximum concurrent connections (backpressure).
    pub max_connections: usize,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
            max_connections: 10_000,
        }
    }
}

/// HTTP handling configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct HttpConfig {
    /// Document root for static files.
    pub web_root: String,

    /// File served for `/`, relative to the web root.
    pub index_file: String,

    /// File served with 404 for missing static resources, relative to the web root.
    pub not_found_file: String,

    /// Upper bound on the request head.
    pub max_header_bytes: usize,

    /// Upper bound on a request body.
    pub max_body_bytes: usize,

    /// Size of a single socket read.
    pub read_buffer_bytes: usize,

    /// How long shutdown waits for open connections to finish.
    pub shutdown_grace_secs: u64,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            web_root: "./www".to_string(),
            index_file: "/index.html".to_string(),
            not_found_file: "/404.html".to_string(),
            max_header_bytes: 64 * 1024,
            max_body_bytes: 2 * 1024 * 1024, // 2MB
            read_buffer_bytes: 64 * 1024,
            shutdown_grace_secs: 10,
        }
    }
}

/// Session store configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Cookie carrying the session id.
    pub cookie_name: String,

    /// Session lifetime in seconds since last access.
    pub ttl_secs: u64,

    /// Refresh the last-access time on every lookup.
    pub keep_alive: bool,

    /// How often expired sessions are purged.
    pub sweep_interval_secs: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            cookie_name: "sessionId".to_string(),
            ttl_secs: 60 * 60,
            keep_alive: true,
            sweep_interval_secs: 60,
        }
    }
}

/// Broadcast group policy.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct GroupsConfig {
    /// Whether clients may create and join groups. Disabled unless set.
    pub allow: bool,
}

/// WebSocket framing configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct WebSocketConfig {
    /// Size of a single socket read on a WebSocket connection.
    pub mtu: usize,

    /// Outgoing messages larger than this are sliced.
    pub chunk_size: usize,

    /// How sliced messages are framed.
    pub fragmentation: Fragmentation,

    /// Largest incoming message accepted.
    pub max_message_bytes: u64,
}

impl Default for WebSocketConfig {
    fn default() -> Self {
        Self {
            mtu: 65_536,
            chunk_size: DEFAULT_CHUNK_SIZE,
            fragmentation: Fragmentation::Continuation,
            max_message_bytes: 16 * 1024 * 1024,
        }
    }
}

/// Response cookie defaults.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct CookieConfig {
    /// Domain used when a handler does not name one.
    pub domain: Option<String>,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}
