//! Tracing/logging initialization for the `SpaceBook` binaries.

use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use crate::error::{Error, Result};

/// Build the env-filter: `RUST_LOG` wins, otherwise `default_filter` plus
/// HTTP request spans from `tower_http`.
pub fn env_filter(default_filter: &str) -> EnvFilter {
    std::env::var("RUST_LOG").map_or_else(
        |_| EnvFilter::new(format!("{default_filter},tower_http=info")),
        EnvFilter::new,
    )
}

/// Install the global tracing subscriber.
///
/// * `default_filter` -- filter used when `RUST_LOG` is not set
///   (e.g. `"spacebook_server=info"`).
/// * `log_json` -- emit one JSON object per line instead of the
///   human-readable format.
///
/// Fails when a global subscriber is already installed.
pub fn init_tracing(default_filter: &str, log_json: bool) -> Result<()> {
    let filter = env_filter(default_filter);
    let installed = if log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .try_init()
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().with_target(false))
            .try_init()
    };
    installed.map_err(|e| Error::Config(format!("Failed to install tracing subscriber: {e}")))
}
