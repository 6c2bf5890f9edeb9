//! Logging bootstrap
//!
//! Filter precedence: `EXAILE_LOG`, then `RUST_LOG`, then the caller's
//! default (e.g. `"exaile_playback=info"`).

use crate::error::{ExaileError, Result};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Environment variable consulted before `RUST_LOG`
pub const LOG_ENV: &str = "EXAILE_LOG";

fn filter(default_filter: &str) -> EnvFilter {
    EnvFilter::try_from_env(LOG_ENV)
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| default_filter.into())
}

/// Install the global subscriber; fails if one is already installed
pub fn init(default_filter: &str) -> Result<()> {
    tracing_subscriber::registry()
        .with(filter(default_filter))
        .with(tracing_subscriber::fmt::layer())
        .try_init()
        .map_err(|e| ExaileError::Logging(e.to_string()))
}

/// Like [`init`] but writes through the test harness and ignores a
/// subscriber that is already installed
pub fn try_init_for_tests(default_filter: &str) {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter(default_filter))
        .with_test_writer()
        .try_init();
}
