//! Subscriber setup for the binary. Library code only emits `tracing` events.

use crate::core::config::BoardConfig;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Install the global subscriber. `RUST_LOG` wins over the configured level.
pub fn init(config: &BoardConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("agentboard={},warn", config.log_level)));

    let registry = tracing_subscriber::registry().with(filter);
    // try_init: a second call (tests, embedding) keeps the first subscriber.
    let _ = if config.log_json {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .try_init()
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .try_init()
    };
}
