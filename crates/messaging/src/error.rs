use std::time::Duration;

use thiserror::Error;

/// Errors that can occur when talking to the message broker.
#[derive(Debug, Error)]
pub enum MessagingError {
    /// A queue was redeclared with parameters that differ from the existing one.
    #[error("Topology conflict on queue '{queue}': {reason}")]
    TopologyConflict { queue: String, reason: String },

    /// The broker could not be reached or rejected the operation.
    #[error("Transport error: {0}")]
    Transport(String),

    /// No broker connection is currently owned.
    #[error("Not connected to the broker")]
    NotConnected,

    /// A broker operation did not complete in time.
    #[error("Broker {operation} timed out after {after:?}")]
    Timeout {
        operation: &'static str,
        after: Duration,
    },

    /// A serialization/deserialization error occurred.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl MessagingError {
    /// Returns true for failures caused by the broker connection itself
    /// rather than by the message.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            MessagingError::Transport(_) | MessagingError::NotConnected | MessagingError::Timeout { .. }
        )
    }
}

impl From<lapin::Error> for MessagingError {
    fn from(err: lapin::Error) -> Self {
        MessagingError::Transport(err.to_string())
    }
}

/// Result type for messaging operations.
pub type Result<T> = std::result::Result<T, MessagingError>;
