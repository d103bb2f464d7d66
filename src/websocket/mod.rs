//! WebSocket subsystem.
//!
//! # Data Flow
//! ```text
//! upgrade request
//!     → handshake.rs (Sec-WebSocket-Accept)
//!     → driver.rs (read loop, controller callbacks)
//!     → frame.rs (decode inbound, encode outbound)
//!     → connection.rs (outbound queue + writer task)
//! ```

pub mod connection;
pub mod driver;
pub mod event;
pub mod frame;
pub mod handshake;

pub use connection::WebSocketConnection;
pub use event::{WebSocketController, WebSocketEvent, WebSocketFactory};
pub use frame::{Message, Opcode};
