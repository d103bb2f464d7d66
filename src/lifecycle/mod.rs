//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Shutdown (shutdown.rs):
//!     Ctrl+C or trigger() → Stop accepting → Drain connections → Exit
//! ```
//!
//! # Design Decisions
//! - Ordered shutdown: stop accept, drain, close
//! - Draining is bounded by `http.shutdown_grace_secs`

pub mod shutdown;

pub use shutdown::Shutdown;
