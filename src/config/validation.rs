//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (limits > 0, chunk size fits a frame)
//! - Validate addresses parse
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: ServerConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::net::SocketAddr;

use thiserror::Error;

use crate::config::schema::ServerConfig;
use crate::websocket::frame::MAX_ENCODED_PAYLOAD;

/// A single semantic problem with a configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{field}: {message}")]
pub struct ValidationError {
    pub field: &'static str,
    pub message: String,
}

impl ValidationError {
    fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

pub fn validate_config(config: &ServerConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.listener.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::new(
            "listener.bind_address",
            format!("'{}' is not a socket address", config.listener.bind_address),
        ));
    }
    if config.listener.max_connections == 0 {
        errors.push(ValidationError::new("listener.max_connections", "must be greater than 0"));
    }

    if config.http.max_header_bytes == 0 {
        errors.push(ValidationError::new("http.max_header_bytes", "must be greater than 0"));
    }
    if config.http.read_buffer_bytes == 0 {
        errors.push(ValidationError::new("http.read_buffer_bytes", "must be greater than 0"));
    }
    if !config.http.index_file.starts_with('/') {
        errors.push(ValidationError::new("http.index_file", "must start with '/'"));
    }

    if config.session.cookie_name.trim().is_empty() {
        errors.push(ValidationError::new("session.cookie_name", "must not be empty"));
    }
    if config.session.ttl_secs == 0 {
        errors.push(ValidationError::new("session.ttl_secs", "must be greater than 0"));
    }
    if config.session.sweep_interval_secs == 0 {
        errors.push(ValidationError::new("session.sweep_interval_secs", "must be greater than 0"));
    }

    if config.websocket.mtu == 0 {
        errors.push(ValidationError::new("websocket.mtu", "must be greater than 0"));
    }
    if config.websocket.chunk_size == 0 || config.websocket.chunk_size > MAX_ENCODED_PAYLOAD {
        errors.push(ValidationError::new(
            "websocket.chunk_size",
            format!("must be between 1 and {}", MAX_ENCODED_PAYLOAD),
        ));
    }

    if config.observability.metrics_enabled
        && config.observability.metrics_address.parse::<SocketAddr>().is_err()
    {
        errors.push(ValidationError::new(
            "observability.metrics_address",
            format!("'{}' is not a socket address", config.observability.metrics_address),
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
