//! Error types shared by the relay layers.
//!
//! Only start-up paths surface these to the caller. Per-connection failures
//! are logged where they happen and end that connection, and upstream receive
//! failures are retried by the listener.

use thiserror::Error;

/// Failures reported by an upstream pub/sub source.
#[derive(Debug, Error)]
pub enum UpstreamError {
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),

    /// The subscription's message stream has ended.
    #[error("subscription to '{0}' is closed")]
    Closed(String),

    /// The subscriber fell behind and `0` messages were skipped.
    #[error("subscriber lagged behind, {0} messages skipped")]
    Lagged(u64),
}

/// Start-up and serving failures of the relay process.
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("invalid settings: {0}")]
    InvalidSettings(String),

    #[error("upstream error: {0}")]
    Upstream(#[from] UpstreamError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
