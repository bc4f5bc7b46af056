//! Tracing subscriber setup.
//!
//! `RUST_LOG` takes precedence over the configured level so operators can
//! raise verbosity for a single run without editing `promptly.toml`.

use tracing_subscriber::EnvFilter;

use crate::config::GeneralConfig;
use crate::error::{PromptlyError, Result};

/// Install the global `tracing` subscriber.
///
/// # Errors
/// Returns `PromptlyError::Config` if the level is not a valid filter
/// directive or a global subscriber is already installed.
pub fn init(general: &GeneralConfig) -> Result<()> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(&general.log_level)
            .map_err(|e| PromptlyError::Config(format!("log_level {:?}: {e}", general.log_level)))?,
    };

    let installed = if general.log_json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_target(true)
            .try_init()
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .try_init()
    };

    installed.map_err(|e| PromptlyError::Config(format!("tracing subscriber: {e}")))
}
