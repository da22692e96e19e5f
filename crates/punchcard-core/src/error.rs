use thiserror::Error;
use uuid::Uuid;

use crate::job::JobStatus;

/// Application-wide error types for punchcard.
#[derive(Error, Debug)]
pub enum AppError {
    /// A field path did not resolve against a record.
    #[error("Path not found: {0}")]
    PathNotFound(String),

    /// The format descriptor or the file layout cannot drive a run.
    #[error("Configuration error: {0}")]
    ConfigurationError(String),

    /// The uploaded bytes could not be read from blob storage.
    #[error("Source not found: {0}")]
    SourceNotFound(String),

    /// The uploaded file could not be converted to JSON.
    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    /// A lifecycle operation was attempted from a status that does not allow it.
    #[error("Job {job_id} is {status}; cannot {action}")]
    NotEligible {
        job_id: Uuid,
        status: JobStatus,
        action: &'static str,
    },

    /// Rollback requested after the rollback window closed.
    #[error("Rollback window of {window_days} days expired for job {job_id}")]
    WindowExpired { job_id: Uuid, window_days: i64 },

    /// Stop requested for a job the worker is neither running nor holding.
    #[error("Job {0} is not running")]
    NotRunning(Uuid),

    /// Referenced entity does not exist.
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: Uuid },

    /// JSON serialization/deserialization failed.
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    /// Invalid or missing configuration value.
    #[error("Config error: {0}")]
    ConfigError(String),

    /// Database operation failed.
    #[error("Database error: {0}")]
    DatabaseError(String),

    /// Blob storage operation failed.
    #[error("Storage error: {0}")]
    StorageError(String),

    /// Durable queue operation failed.
    #[error("Queue error: {0}")]
    QueueError(String),
}

impl AppError {
    /// Returns true for errors that fail a whole job before any record is processed.
    pub fn is_job_level(&self) -> bool {
        matches!(
            self,
            AppError::PathNotFound(_)
                | AppError::ConfigurationError(_)
                | AppError::SourceNotFound(_)
                | AppError::UnsupportedFormat(_)
                | AppError::SerializationError(_)
                | AppError::NotFound { .. }
        )
    }

    /// Returns true for operator-facing precondition failures.
    pub fn is_precondition(&self) -> bool {
        matches!(
            self,
            AppError::NotEligible { .. } | AppError::WindowExpired { .. } | AppError::NotRunning(_)
        )
    }
}

/// Per-record failure. Collected into the job report, never raised.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RecordError {
    #[error("missing field '{field}'")]
    MissingField { field: &'static str },

    #[error("no employee matches number '{0}'")]
    UnknownEmployee(String),

    #[error("unparsable timestamp '{0}'")]
    InvalidTimestamp(String),

    #[error("timestamp {0} is in the future")]
    FutureTimestamp(String),

    #[error("timestamp {timestamp} is older than the {horizon_days}-day import window")]
    OutsideWindow {
        timestamp: String,
        horizon_days: i64,
    },

    #[error("employee lookup failed: {0}")]
    LookupFailed(String),

    #[error("write failed: {0}")]
    WriteFailed(String),
}
