//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! All subsystems produce:
//!     → logging.rs (structured log events via `tracing`)
//!     → metrics.rs (counters and gauges via `metrics`)
//!
//! Consumers:
//!     → stdout (fmt layer, filtered by RUST_LOG or config)
//!     → Prometheus scrape endpoint (optional)
//! ```
//!
//! # Design Decisions
//! - Connection ids flow through every log event as `connection_id`
//! - Metric updates are no-ops until a recorder is installed

pub mod logging;
pub mod metrics;
