//! Embeddable HTTP/1.1 and WebSocket application server.

// Core subsystems
pub mod config;
pub mod context;
pub mod http;
pub mod net;
pub mod routing;
pub mod websocket;

// Application state
pub mod controllers;
pub mod group;
pub mod session;

// Cross-cutting concerns
pub mod lifecycle;
pub mod observability;

pub use config::schema::ServerConfig;
pub use context::{ServerBuilder, ServerContext};
pub use http::HttpServer;
pub use lifecycle::Shutdown;
