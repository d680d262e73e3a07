//! Error types for the engine core.

use crate::fix::FixKind;
use crate::model::{ComponentId, ConnectionId};
use archsim_env::EnvError;
use thiserror::Error;

/// Errors returned by engine commands.
///
/// Every variant is local to the command that produced it: engine state is
/// left unchanged.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("Unknown component: {0}")]
    UnknownComponent(ComponentId),
    
    #[error("Unknown connection: {0}")]
    UnknownConnection(ConnectionId),
    
    #[error("Duplicate component id: {0}")]
    DuplicateComponent(ComponentId),
    
    #[error("Duplicate connection id: {0}")]
    DuplicateConnection(ConnectionId),
    
    #[error("Invalid connection {connection}: {reason}")]
    InvalidConnection {
        connection: ConnectionId,
        reason: String,
    },
    
    /// Fix preconditions don't hold for the current state
    #[error("Fix '{fix}' not applicable to {component}: {reason}")]
    FixNotApplicable {
        fix: FixKind,
        component: ComponentId,
        reason: String,
    },
    
    #[error("Capacity of {0} must be finite and non-negative")]
    InvalidCapacity(ComponentId),

    #[error("Traffic level must be within [0, 1], got {0}")]
    InvalidTrafficLevel(f64),
    
    #[error("Invalid chaos event: {0}")]
    InvalidChaos(String),
    
    #[error("Cannot simulate an empty graph")]
    EmptyGraph,
    
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    
    #[error(transparent)]
    Env(#[from] EnvError),
}

impl CoreError {
    /// Creates an invalid-connection error.
    pub fn invalid_connection(connection: &ConnectionId, reason: impl Into<String>) -> Self {
        Self::InvalidConnection {
            connection: connection.clone(),
            reason: reason.into(),
        }
    }
    
    /// Creates a fix-not-applicable error.
    pub fn fix_not_applicable(
        fix: FixKind,
        component: &ComponentId,
        reason: impl Into<String>,
    ) -> Self {
        Self::FixNotApplicable {
            fix,
            component: component.clone(),
            reason: reason.into(),
        }
    }
    
    /// Creates an invalid-chaos error.
    pub fn invalid_chaos(reason: impl Into<String>) -> Self {
        Self::InvalidChaos(reason.into())
    }
}
