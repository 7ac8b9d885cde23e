use std::time::Duration;

use messaging::MessagingError;
use thiserror::Error;

/// Errors raised by the order service and its store.
#[derive(Debug, Error)]
pub enum OrderError {
    /// The order total is negative.
    #[error("total_cents must not be negative, got {0}")]
    InvalidTotal(i64),

    /// The store is unreachable or rejected the operation.
    #[error("Storage error: {0}")]
    Storage(String),

    /// A database error occurred.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A database migration error occurred.
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// A store call did not complete in time.
    #[error("Storage timed out after {0:?}")]
    StorageTimeout(Duration),

    /// A serialization/deserialization error occurred.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Publishing to the broker failed.
    #[error("Messaging error: {0}")]
    Messaging(#[from] MessagingError),
}

impl OrderError {
    /// True for failures of the datastore itself (not timeouts).
    pub fn is_storage(&self) -> bool {
        matches!(
            self,
            OrderError::Storage(_) | OrderError::Database(_) | OrderError::Migration(_)
        )
    }
}

/// Result type for order operations.
pub type Result<T> = std::result::Result<T, OrderError>;
