//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → ServerConfig (validated, immutable)
//!     → shared via Arc<ServerContext> to every connection task
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; routes and limits are fixed at startup
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{load_config, ConfigError};
pub use schema::{
    CookieConfig, GroupsConfig, HttpConfig, ListenerConfig, ObservabilityConfig, ServerConfig,
    SessionConfig, WebSocketConfig,
};
