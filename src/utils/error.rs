//! The `error` module defines the error types used within `orderpub`.
//!
//! Errors stay inside the crate's plumbing: the publishing path converts every
//! failure into a log line plus "queued for retry", so callers of
//! `Publisher::publish` never see these types. They surface only from the
//! storage helpers, configuration loading, and the broker client seam.
//! `BrokerError` never leaves the producer; it is logged and turned into a
//! requeue.

use thiserror::Error;

/// Failures reported by a [`crate::client::BrokerClient`].
#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("broker client is not connected")]
    NotConnected,
    #[error("handshake failed: {0}")]
    Handshake(String),
    #[error("broker rejected request: {0}")]
    Rejected(String),
    #[error("send timed out after {0:?}")]
    Timeout(std::time::Duration),
    #[error("transport error: {0}")]
    Transport(String),
    #[error("failed to encode frame: {0}")]
    Serialize(#[from] serde_json::Error),
}

impl From<tungstenite::Error> for BrokerError {
    fn from(err: tungstenite::Error) -> Self {
        BrokerError::Transport(err.to_string())
    }
}

/// Crate-level error.
#[derive(Debug, Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("configuration error: {0}")]
    Config(#[from] config::ConfigError),
    #[error("background task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

pub type Result<T> = std::result::Result<T, Error>;
