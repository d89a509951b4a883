//! Tracing subscriber setup.

use crate::error::{ChainError, Result};
use tracing_subscriber::{fmt, EnvFilter};

/// Installs the global `tracing` subscriber for a storage node.
///
/// `level` accepts any `EnvFilter` directive, e.g. `"info"` or
/// `"sombra_chain::transaction=debug"`.
pub fn init_logging(level: &str) -> Result<()> {
    fmt()
        .with_env_filter(
            EnvFilter::try_new(level)
                .map_err(|e| ChainError::InvalidArgument(format!("Invalid log level: {e}")))?,
        )
        .with_target(true)
        .with_thread_ids(true)
        .try_init()
        .map_err(|_| ChainError::InvalidArgument("Logging already initialized".into()))
}
