//! Structured logging.
//!
//! `RUST_LOG` wins when set; otherwise the configured level applies to this
//! crate and `warn` to everything else.

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Filter directive used when `RUST_LOG` is absent.
pub fn default_directive(level: &str) -> String {
    format!("warn,arcway={}", level)
}

/// Install the global subscriber. Returns false if one was already installed.
pub fn init_logging(level: &str) -> bool {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive(level)));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().with_target(true))
        .try_init()
        .is_ok()
}
