//! Error types for the environment abstraction.

use thiserror::Error;

/// Errors that can occur in the environment abstraction layer.
#[derive(Debug, Error)]
pub enum EnvError {
    /// Persisting or loading a snapshot failed
    #[error("Sync error: {0}")]
    SyncError(String),
    
    /// A command or publish channel was closed (owner shut down)
    #[error("Channel closed: {0}")]
    ChannelClosed(String),
    
    /// Speed multiplier is negative or not a number
    #[error("Invalid speed multiplier: {0}")]
    InvalidSpeed(f64),
}

impl EnvError {
    /// Creates a sync error.
    pub fn sync(msg: impl Into<String>) -> Self {
        Self::SyncError(msg.into())
    }
    
    /// Creates a channel-closed error.
    pub fn closed(what: impl std::fmt::Display) -> Self {
        Self::ChannelClosed(what.to_string())
    }
}
