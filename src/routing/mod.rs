//! Routing subsystem.
//!
//! # Data Flow
//! ```text
//! Request target ("/A/b/c?x=1", method)
//!     → router.rs (strip query, split segments)
//!     → probe "/a/b/c", "/a/b", "/a" (lowercased)
//!     → Return: Resolution { handler, args, key }
//!
//! Route registration (at startup):
//!     RouteTable::new(not_found).route(path, filter, handler)...
//!     → Frozen inside ServerContext
//! ```
//!
//! # Design Decisions
//! - Tables built at startup, immutable at runtime
//! - Longest registered prefix wins; the rest of the path becomes args
//! - Deterministic: same input always resolves to the same handler
//! - A miss resolves to the table's not-found handler, never an error

pub mod router;

pub use router::{normalize_key, MethodFilter, Resolution, RouteTable};
