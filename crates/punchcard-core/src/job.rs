use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::AppError;
use crate::models::FailedEntry;

/// Days after submission during which a finished job may be rolled back.
pub const ROLLBACK_WINDOW_DAYS: i64 = 3;

/// Status of a bulk ingestion job.
///
/// ```text
/// new ──> processing ──> completed | failed | force_stopped
/// completed | failed ──> rollback
/// new | rollback ──> deleted
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    New,
    Processing,
    Completed,
    Failed,
    ForceStopped,
    Rollback,
    Deleted,
}

impl JobStatus {
    pub const ALL: [JobStatus; 7] = [
        JobStatus::New,
        JobStatus::Processing,
        JobStatus::Completed,
        JobStatus::Failed,
        JobStatus::ForceStopped,
        JobStatus::Rollback,
        JobStatus::Deleted,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::New => "new",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::ForceStopped => "force_stopped",
            JobStatus::Rollback => "rollback",
            JobStatus::Deleted => "deleted",
        }
    }

    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        use JobStatus::*;
        matches!(
            (self, next),
            (New, Processing)
                | (Processing, Completed)
                | (Processing, Failed)
                | (Processing, ForceStopped)
                | (Completed, Rollback)
                | (Failed, Rollback)
                | (New, Deleted)
                | (Rollback, Deleted)
        )
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "new" => Ok(JobStatus::New),
            "processing" => Ok(JobStatus::Processing),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            "force_stopped" => Ok(JobStatus::ForceStopped),
            "rollback" => Ok(JobStatus::Rollback),
            "deleted" => Ok(JobStatus::Deleted),
            _ => Err(format!("Unknown job status: {s}")),
        }
    }
}

/// Result of asking a job to start.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartDecision {
    /// The job is `new` and should move to `processing`.
    Begin,
    /// The job already completed; nothing to do.
    AlreadyHandled,
    /// The job is already `processing`.
    AlreadyRunning,
}

/// One bulk import request over a single uploaded file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BulkJob {
    pub id: Uuid,
    /// Blob key of the uploaded file.
    pub source_file: String,
    /// SHA-256 of the uploaded bytes.
    pub source_hash: String,
    /// Blob key of the canonical JSON produced by the normalizer.
    pub normalized_file: Option<String>,
    pub status: JobStatus,
    pub total_records: u32,
    pub success_count: u32,
    pub failed_count: u32,
    pub failed_records: Vec<serde_json::Value>,
    pub failed_report: Vec<FailedEntry>,
    pub format_descriptor_id: Uuid,
    pub added_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl BulkJob {
    pub fn check_start(&self) -> Result<StartDecision, AppError> {
        match self.status {
            JobStatus::New => Ok(StartDecision::Begin),
            JobStatus::Completed => Ok(StartDecision::AlreadyHandled),
            JobStatus::Processing => Ok(StartDecision::AlreadyRunning),
            status => Err(self.not_eligible(status, "start processing")),
        }
    }

    pub fn check_rollback(&self, now: DateTime<Utc>) -> Result<(), AppError> {
        if !self.status.can_transition_to(JobStatus::Rollback) {
            return Err(self.not_eligible(self.status, "roll back"));
        }
        if now - self.added_at > TimeDelta::days(ROLLBACK_WINDOW_DAYS) {
            return Err(AppError::WindowExpired {
                job_id: self.id,
                window_days: ROLLBACK_WINDOW_DAYS,
            });
        }
        Ok(())
    }

    pub fn check_delete(&self) -> Result<(), AppError> {
        if !self.status.can_transition_to(JobStatus::Deleted) {
            return Err(self.not_eligible(self.status, "delete"));
        }
        Ok(())
    }

    pub fn check_stop(&self) -> Result<(), AppError> {
        if self.status != JobStatus::Processing {
            return Err(AppError::NotRunning(self.id));
        }
        Ok(())
    }

    fn not_eligible(&self, status: JobStatus, action: &'static str) -> AppError {
        AppError::NotEligible {
            job_id: self.id,
            status,
            action,
        }
    }
}

/// Request to create a new bulk job.
#[derive(Debug, Clone)]
pub struct CreateBulkJobRequest {
    pub source_file: String,
    pub source_hash: String,
    pub format_descriptor_id: Uuid,
}

impl CreateBulkJobRequest {
    pub fn new(
        source_file: impl Into<String>,
        source_hash: impl Into<String>,
        format_descriptor_id: Uuid,
    ) -> Self {
        Self {
            source_file: source_file.into(),
            source_hash: source_hash.into(),
            format_descriptor_id,
        }
    }
}

/// Counters and diagnostics written back when a run ends.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RunSummary {
    pub total_records: u32,
    pub success_count: u32,
    pub failed_count: u32,
    pub failed_records: Vec<serde_json::Value>,
    pub failed_report: Vec<FailedEntry>,
}

impl RunSummary {
    /// Summary for a job that failed before any record was processed.
    pub fn aborted(total_records: u32, reason: impl Into<String>) -> Self {
        Self {
            total_records,
            failed_report: vec![FailedEntry::job(reason)],
            ..Self::default()
        }
    }

    pub fn processed(&self) -> u32 {
        self.success_count + self.failed_count
    }
}
