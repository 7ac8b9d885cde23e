use std::time::Duration;

use messaging::MessagingError;
use thiserror::Error;

/// Errors raised by the inventory service and its store.
#[derive(Debug, Error)]
pub enum InventoryError {
    /// The product id is missing or empty.
    #[error("product_id must not be empty")]
    InvalidProduct,

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

    /// A delivery body could not be parsed.
    #[error("Malformed message: {0}")]
    MalformedMessage(String),

    /// Talking to the broker failed.
    #[error("Messaging error: {0}")]
    Messaging(#[from] MessagingError),
}

impl InventoryError {
    /// True for failures of the datastore itself (not timeouts).
    pub fn is_storage(&self) -> bool {
        matches!(
            self,
            InventoryError::Storage(_) | InventoryError::Database(_) | InventoryError::Migration(_)
        )
    }

    /// True for failures that say nothing about the message itself: the
    /// store or the broker was unavailable or slow.
    pub fn is_transient(&self) -> bool {
        match self {
            InventoryError::StorageTimeout(_) => true,
            InventoryError::Messaging(e) => e.is_transport(),
            other => other.is_storage(),
        }
    }
}

/// Result type for inventory operations.
pub type Result<T> = std::result::Result<T, InventoryError>;
