//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming TCP connection
//!     → listener.rs (accept loop, connection limits)
//!     → connection.rs (ids, lifecycle tracking, state machine)
//!     → http::server (request head, dispatch, upgrade)
//!
//! Connection States:
//!     AwaitingRequestLine → ParsingHeaders
//!         → StaticFile | DispatchController | UpgradeWebSocket → WsFrameLoop
//!         → Closed
//! ```
//!
//! # Design Decisions
//! - Bounded accept queue prevents resource exhaustion
//! - Each connection tracked for graceful shutdown
//! - Plain TCP only

pub mod connection;
pub mod listener;
