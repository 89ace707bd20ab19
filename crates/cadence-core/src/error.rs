//! Cadence error taxonomy.
//!
//! The engine distinguishes fatal configuration problems (never retried)
//! from infrastructure failures (retryable via event redelivery or the
//! next scheduler tick). "Conditions not met" and non-2xx webhook
//! responses are NOT errors — they are recorded as normal outcomes.

use thiserror::Error;

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, CadenceError>;

/// All error conditions surfaced by the engine.
#[derive(Debug, Error)]
pub enum CadenceError {
    /// Bad rule/action/provider configuration — fatal, never retried.
    #[error("Config error: {0}")]
    Config(String),

    /// Channel transport failure (not connected, send failed) — retryable.
    #[error("Channel error: {0}")]
    Channel(String),

    /// External data provider failure (unreachable, credential expired) — retryable.
    #[error("Provider error: {0}")]
    Provider(String),

    /// Persistence failure.
    #[error("Store error: {0}")]
    Store(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl CadenceError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn channel(msg: impl Into<String>) -> Self {
        Self::Channel(msg.into())
    }

    pub fn provider(msg: impl Into<String>) -> Self {
        Self::Provider(msg.into())
    }

    pub fn store(msg: impl Into<String>) -> Self {
        Self::Store(msg.into())
    }

    /// Whether the outer at-least-once layer should redeliver after this
    /// failure. Configuration errors are fatal and must surface as-is.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::Config(_))
    }
}
