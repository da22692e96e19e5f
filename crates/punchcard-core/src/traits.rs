use std::future::Future;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::AppError;
use crate::job::{BulkJob, CreateBulkJobRequest, JobStatus, RunSummary};
use crate::models::{FormatDescriptor, NewAttendanceRecord, NewFormatDescriptor};
use crate::worker::{StartOutcome, StopOutcome};

/// Raw byte storage for uploads and normalized files.
pub trait BlobStore: Send + Sync + Clone {
    fn get(&self, key: &str) -> impl Future<Output = Result<Vec<u8>, AppError>> + Send;

    /// Store `bytes` under `key` and return the key that was written.
    fn put(
        &self,
        key: &str,
        bytes: Vec<u8>,
    ) -> impl Future<Output = Result<String, AppError>> + Send;
}

/// Converts a spreadsheet workbook into a JSON array of row objects.
pub trait SheetConverter: Send + Sync + Clone {
    /// Whether this converter understands files with the given extension.
    fn supports(&self, extension: &str) -> bool;

    fn convert(&self, bytes: &[u8], extension: &str) -> Result<serde_json::Value, AppError>;
}

/// Persistence for bulk jobs, including their state-transition guards.
pub trait JobStore: Send + Sync + Clone {
    fn create_job(
        &self,
        request: CreateBulkJobRequest,
    ) -> impl Future<Output = Result<BulkJob, AppError>> + Send;

    fn get_job(&self, job_id: Uuid)
    -> impl Future<Output = Result<Option<BulkJob>, AppError>> + Send;

    /// List jobs, newest first. Deleted jobs only appear when asked for by status.
    fn list_jobs(
        &self,
        status: Option<JobStatus>,
        limit: usize,
    ) -> impl Future<Output = Result<Vec<BulkJob>, AppError>> + Send;

    /// Move a `new` job to `processing`. Returns false if the job was not `new`.
    fn mark_processing(&self, job_id: Uuid) -> impl Future<Output = Result<bool, AppError>> + Send;

    fn set_normalized_file(
        &self,
        job_id: Uuid,
        key: &str,
    ) -> impl Future<Output = Result<(), AppError>> + Send;

    fn set_total_records(
        &self,
        job_id: Uuid,
        total: u32,
    ) -> impl Future<Output = Result<(), AppError>> + Send;

    /// Write the final counters and report and move the job to `status`.
    fn finish_run(
        &self,
        job_id: Uuid,
        status: JobStatus,
        summary: &RunSummary,
    ) -> impl Future<Output = Result<(), AppError>> + Send;

    /// Delete the job's attendance records and move it to `rollback`,
    /// atomically. Returns the number of records removed.
    fn rollback(
        &self,
        job_id: Uuid,
        now: DateTime<Utc>,
    ) -> impl Future<Output = Result<u64, AppError>> + Send;

    /// Soft delete: the row stays, marked `deleted`.
    fn soft_delete(&self, job_id: Uuid) -> impl Future<Output = Result<(), AppError>> + Send;

    fn count_by_status(
        &self,
        status: JobStatus,
    ) -> impl Future<Output = Result<i64, AppError>> + Send;
}

/// Read/write access to format descriptors.
pub trait DescriptorStore: Send + Sync + Clone {
    fn create_descriptor(
        &self,
        descriptor: &NewFormatDescriptor,
    ) -> impl Future<Output = Result<FormatDescriptor, AppError>> + Send;

    fn get_descriptor(
        &self,
        id: Uuid,
    ) -> impl Future<Output = Result<Option<FormatDescriptor>, AppError>> + Send;
}

/// Attendance punches, unique on `(user_id, check_in)`.
pub trait AttendanceStore: Send + Sync + Clone {
    /// Insert the punch unless one already exists for the same user and
    /// instant. Returns true when a row was written.
    fn upsert(
        &self,
        record: &NewAttendanceRecord,
    ) -> impl Future<Output = Result<bool, AppError>> + Send;
}

/// Maps employee numbers printed by the devices to user ids.
pub trait EmployeeDirectory: Send + Sync + Clone {
    fn find_user_id(
        &self,
        employee_number: &str,
    ) -> impl Future<Output = Result<Option<Uuid>, AppError>> + Send;
}

/// Downstream collaborator told when the worker runs out of jobs.
pub trait IdleListener: Send + Sync + Clone {
    fn on_worker_idle(&self) -> impl Future<Output = ()> + Send;
}

/// Accepts start and stop commands for bulk jobs.
pub trait JobRunner: Send + Sync + Clone {
    fn request_processing(&self, job_id: Uuid) -> StartOutcome;

    fn request_stop(
        &self,
        job_id: Uuid,
    ) -> impl Future<Output = Result<StopOutcome, AppError>> + Send;
}
