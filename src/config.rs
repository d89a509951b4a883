//! Node-level tuning for chains and the resumer, loaded from TOML.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Tunables for the chain transaction manager.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChainConfig {
    /// Number of retries when the mirror partition answers `E_LEADER_CHANGED`.
    pub rpc_max_retry: u32,
    /// Pause between leader-changed retries.
    pub rpc_retry_backoff_ms: u64,
    /// Period of the background resume loop.
    pub resume_interval_ms: u64,
    /// Whether `start()` spawns the background resume loop.
    pub enable_resume: bool,
    /// Whether a leadership acquisition seeds the dangling table from disk.
    pub scan_on_leader_elected: bool,
    /// Logs every phase transition at debug level.
    pub trace_chain: bool,
}

impl Default for ChainConfig {
    fn default() -> Self {
        Self {
            rpc_max_retry: 3,
            rpc_retry_backoff_ms: 10,
            resume_interval_ms: 1000,
            enable_resume: true,
            scan_on_leader_elected: true,
            trace_chain: false,
        }
    }
}

impl ChainConfig {
    /// Short intervals and no backoff, for tests and local clusters.
    pub fn testing() -> Self {
        Self {
            rpc_max_retry: 3,
            rpc_retry_backoff_ms: 0,
            resume_interval_ms: 20,
            enable_resume: false,
            scan_on_leader_elected: true,
            trace_chain: true,
        }
    }

    /// Reads a TOML config file. Missing keys fall back to defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_toml_str(&contents).map_err(|source| match source {
            ConfigError::ParseStr { source } => ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            },
            other => other,
        })?;
        Ok(config)
    }

    /// Parses a TOML document.
    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        let config: ChainConfig =
            toml::from_str(contents).map_err(|source| ConfigError::ParseStr { source })?;
        config.validate()?;
        Ok(config)
    }

    /// Serializes the config as pretty TOML.
    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(|source| ConfigError::Serialize { source })
    }

    /// Rejects values the manager cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.resume_interval_ms == 0 {
            return Err(ConfigError::Invalid {
                field: "resume_interval_ms",
                reason: "must be positive",
            });
        }
        Ok(())
    }

    /// Resume loop period.
    pub fn resume_interval(&self) -> Duration {
        Duration::from_millis(self.resume_interval_ms)
    }

    /// Leader-changed retry backoff.
    pub fn rpc_retry_backoff(&self) -> Duration {
        Duration::from_millis(self.rpc_retry_backoff_ms)
    }
}

/// Errors raised while loading a [`ChainConfig`].
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The config file could not be read.
    #[error("failed to read chain config {path}: {source}")]
    Read {
        /// Path that was read.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },
    /// The config file is not valid TOML for this schema.
    #[error("failed to parse chain config {path}: {source}")]
    Parse {
        /// Path that was parsed.
        path: PathBuf,
        /// Underlying TOML error.
        source: toml::de::Error,
    },
    /// An in-memory TOML document is invalid.
    #[error("failed to parse chain config: {source}")]
    ParseStr {
        /// Underlying TOML error.
        source: toml::de::Error,
    },
    /// The config could not be serialized.
    #[error("failed to serialize chain config: {source}")]
    Serialize {
        /// Underlying TOML error.
        source: toml::ser::Error,
    },
    /// A field holds an unusable value.
    #[error("chain config field '{field}' {reason}")]
    Invalid {
        /// Offending field.
        field: &'static str,
        /// Why it was rejected.
        reason: &'static str,
    },
}
