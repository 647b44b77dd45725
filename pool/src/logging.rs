//! Log setup for the pool daemon.
//!
//! Wired from [`PoolConfig`]: `log_level` seeds the filter and
//! `log_format` picks line-oriented output for a terminal or JSON for
//! aggregation. A `RUST_LOG` environment variable, when present, wins
//! over both. Without `RUST_LOG`, the configured level applies to the
//! pool's own crates while the settlement HTTP client's internals
//! (hyper, reqwest) stay at warn; a pool debugging its billing doesn't
//! want connection-pool chatter drowning the updates.

use tracing_subscriber::EnvFilter;

use crate::{PoolConfig, PoolError};

/// Selects the output format for structured logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// Line-oriented output for terminals.
    Human,
    /// Newline-delimited JSON for log aggregation pipelines.
    Json,
}

impl LogFormat {
    /// Parse a config string; anything that isn't "json" is human.
    pub fn from_config(s: &str) -> Self {
        if s.eq_ignore_ascii_case("json") {
            Self::Json
        } else {
            Self::Human
        }
    }
}

/// Install the global subscriber per the pool config.
///
/// Fails if a subscriber is already installed (e.g. a test harness got
/// there first), which the daemon treats as a config error.
pub fn init_logging(config: &PoolConfig) -> Result<(), PoolError> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directives(&config.log_level)));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true);

    match LogFormat::from_config(&config.log_format) {
        LogFormat::Human => builder.try_init(),
        LogFormat::Json => builder.json().try_init(),
    }
    .map_err(|e| PoolError::Config(format!("logging init: {e}")))
}

/// The filter used when `RUST_LOG` is unset: the configured level for
/// everything, with the HTTP client stack capped at warn.
fn default_directives(level: &str) -> String {
    format!("{level},hyper=warn,reqwest=warn")
}
