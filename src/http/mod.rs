//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → request.rs (read head + body under limits)
//!     → server.rs (static file | controller | WebSocket upgrade)
//!     → event.rs (controller builds the response)
//!     → response.rs (serialize, Connection: close)
//!     → Send to client
//! ```

pub mod content_type;
pub mod cookie;
pub mod event;
pub mod header;
pub mod request;
pub mod response;
pub mod server;

pub use event::{HttpEvent, HttpHandler};
pub use request::HttpRequest;
pub use response::{HttpResponse, Status};
pub use server::HttpServer;
