//! Error taxonomy of the notification engine.

use thiserror::Error;

use casedesk_common::error::AppError;

/// Failures raised by a [`crate::store::NotificationStore`].
#[derive(Debug, Error)]
pub enum StoreError {
    /// The record failed validation and nothing was written.
    #[error("Invalid notification data: {0}")]
    InvalidData(String),

    /// A notification with the same recipient and dedup key already exists
    /// inside the dedup window.
    #[error("Duplicate notification for recipient {recipient_id} under key '{dedup_key}'")]
    Duplicate { recipient_id: i64, dedup_key: String },

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Failures of a fanout call, either for the whole call or a single recipient.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The event itself is malformed. Aborts the whole call.
    #[error("Validation error: {0}")]
    Validation(String),

    /// Directory or dedup-existence lookup failed. Nothing is created.
    #[error("Lookup failed: {0}")]
    Lookup(String),

    /// Persisting an admitted notification failed.
    #[error("Storage failed: {0}")]
    Storage(String),

    /// The recipient's deadline elapsed before processing finished.
    #[error("Timed out after {0:?}")]
    Timeout(std::time::Duration),
}

impl From<StoreError> for EngineError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::InvalidData(msg) => EngineError::Validation(msg),
            other => EngineError::Storage(other.to_string()),
        }
    }
}

impl From<EngineError> for AppError {
    fn from(err: EngineError) -> Self {
        match err {
            EngineError::Validation(msg) => AppError::Validation(msg),
            EngineError::Lookup(msg) => AppError::Unavailable(msg),
            EngineError::Storage(msg) => AppError::Internal(msg),
            EngineError::Timeout(after) => {
                AppError::Unavailable(format!("Timed out after {:?}", after))
            }
        }
    }
}
