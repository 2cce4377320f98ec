// src/error.rs

use thiserror::Error;

/// Failures surfaced before a session produces its first snapshot.
///
/// Once frames are flowing, problems are absorbed into the snapshot stream
/// instead (see `pipeline::session`).
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("failed to parse configuration: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("frame source unavailable: {0}")]
    Source(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl SessionError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn is_config(&self) -> bool {
        matches!(self, Self::Config(_) | Self::Yaml(_))
    }
}
