//! Structured tracing helpers.

use anyhow::{Context, Result};
use tracing_subscriber::EnvFilter;

/// Installs a global `fmt` subscriber.
///
/// The filter is read from `RUST_LOG` when set, otherwise `default_directive`
/// (for example `"agent_memory=debug"`) is used.
///
/// # Errors
///
/// Returns an error when the directive cannot be parsed or a global
/// subscriber has already been installed.
pub fn init_tracing(default_directive: &str) -> Result<()> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(default_directive)
            .with_context(|| format!("invalid tracing directive `{default_directive}`"))?,
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init()
        .map_err(|err| anyhow::anyhow!(err))
        .context("failed to install tracing subscriber")?;

    tracing::debug!("tracing initialised");
    Ok(())
}
