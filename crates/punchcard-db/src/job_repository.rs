use chrono::{DateTime, TimeDelta, Utc};
use sqlx::types::Json;
use sqlx::{PgPool, Pool, Postgres};
use uuid::Uuid;

use punchcard_core::error::AppError;
use punchcard_core::job::{
    BulkJob, CreateBulkJobRequest, JobStatus, ROLLBACK_WINDOW_DAYS, RunSummary,
};
use punchcard_core::models::FailedEntry;
use punchcard_core::traits::JobStore;

/// PostgreSQL-backed bulk job store.
///
/// Every transition is a conditional `UPDATE` on the current status, so two
/// callers racing on the same job cannot both win.
#[derive(Clone)]
pub struct BulkJobRepository {
    pool: Pool<Postgres>,
}

impl BulkJobRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Build the error for a conditional update that matched no row.
    async fn refusal(
        &self,
        job_id: Uuid,
        guard: impl FnOnce(&BulkJob) -> Result<(), AppError>,
    ) -> AppError {
        match self.get_job(job_id).await {
            Ok(Some(job)) => guard(&job).err().unwrap_or_else(|| {
                AppError::DatabaseError(format!("Job {job_id} changed concurrently"))
            }),
            Ok(None) => AppError::NotFound {
                entity: "job",
                id: job_id,
            },
            Err(e) => e,
        }
    }
}

// -- Internal row type for sqlx deserialization --

#[derive(sqlx::FromRow)]
struct BulkJobRow {
    id: Uuid,
    source_file: String,
    source_hash: String,
    normalized_file: Option<String>,
    status: String,
    total_records: i32,
    success_count: i32,
    failed_count: i32,
    failed_records: Json<Vec<serde_json::Value>>,
    failed_report: Json<Vec<FailedEntry>>,
    format_descriptor_id: Uuid,
    added_at: DateTime<Utc>,
    started_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
    deleted_at: Option<DateTime<Utc>>,
}

impl From<BulkJobRow> for BulkJob {
    fn from(row: BulkJobRow) -> Self {
        BulkJob {
            id: row.id,
            source_file: row.source_file,
            source_hash: row.source_hash,
            normalized_file: row.normalized_file,
            status: row.status.parse().unwrap_or(JobStatus::Failed),
            total_records: row.total_records as u32,
            success_count: row.success_count as u32,
            failed_count: row.failed_count as u32,
            failed_records: row.failed_records.0,
            failed_report: row.failed_report.0,
            format_descriptor_id: row.format_descriptor_id,
            added_at: row.added_at,
            started_at: row.started_at,
            completed_at: row.completed_at,
            deleted_at: row.deleted_at,
        }
    }
}

fn to_i32(value: u32) -> i32 {
    i32::try_from(value).unwrap_or(i32::MAX)
}

impl JobStore for BulkJobRepository {
    async fn create_job(&self, request: CreateBulkJobRequest) -> Result<BulkJob, AppError> {
        let row = sqlx::query_as::<_, BulkJobRow>(
            r#"
            INSERT INTO bulk_attendance_jobs (source_file, source_hash, format_descriptor_id)
            VALUES ($1, $2, $3)
            RETURNING *
            "#,
        )
        .bind(&request.source_file)
        .bind(&request.source_hash)
        .bind(request.format_descriptor_id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        Ok(row.into())
    }

    async fn get_job(&self, job_id: Uuid) -> Result<Option<BulkJob>, AppError> {
        let row = sqlx::query_as::<_, BulkJobRow>(
            r#"SELECT * FROM bulk_attendance_jobs WHERE id = $1"#,
        )
        .bind(job_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        Ok(row.map(Into::into))
    }

    async fn list_jobs(
        &self,
        status: Option<JobStatus>,
        limit: usize,
    ) -> Result<Vec<BulkJob>, AppError> {
        let rows = if let Some(status) = status {
            sqlx::query_as::<_, BulkJobRow>(
                r#"
                SELECT * FROM bulk_attendance_jobs
                WHERE status = $1
                ORDER BY added_at DESC
                LIMIT $2
                "#,
            )
            .bind(status.as_str())
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await
        } else {
            sqlx::query_as::<_, BulkJobRow>(
                r#"
                SELECT * FROM bulk_attendance_jobs
                WHERE status <> 'deleted'
                ORDER BY added_at DESC
                LIMIT $1
                "#,
            )
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await
        }
        .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn mark_processing(&self, job_id: Uuid) -> Result<bool, AppError> {
        let result = sqlx::query(
            r#"
            UPDATE bulk_attendance_jobs
            SET status = 'processing', started_at = NOW()
            WHERE id = $1 AND status = 'new'
            "#,
        )
        .bind(job_id)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        Ok(result.rows_affected() == 1)
    }

    async fn set_normalized_file(&self, job_id: Uuid, key: &str) -> Result<(), AppError> {
        sqlx::query(r#"UPDATE bulk_attendance_jobs SET normalized_file = $2 WHERE id = $1"#)
            .bind(job_id)
            .bind(key)
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        Ok(())
    }

    async fn set_total_records(&self, job_id: Uuid, total: u32) -> Result<(), AppError> {
        sqlx::query(
            r#"
            UPDATE bulk_attendance_jobs
            SET total_records = $2, success_count = 0, failed_count = 0
            WHERE id = $1
            "#,
        )
        .bind(job_id)
        .bind(to_i32(total))
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        Ok(())
    }

    async fn finish_run(
        &self,
        job_id: Uuid,
        status: JobStatus,
        summary: &RunSummary,
    ) -> Result<(), AppError> {
        let result = sqlx::query(
            r#"
            UPDATE bulk_attendance_jobs
            SET status = $2,
                total_records = $3,
                success_count = $4,
                failed_count = $5,
                failed_records = $6,
                failed_report = $7,
                completed_at = NOW()
            WHERE id = $1 AND status = 'processing'
            "#,
        )
        .bind(job_id)
        .bind(status.as_str())
        .bind(to_i32(summary.total_records))
        .bind(to_i32(summary.success_count))
        .bind(to_i32(summary.failed_count))
        .bind(Json(&summary.failed_records))
        .bind(Json(&summary.failed_report))
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        if result.rows_affected() == 0 {
            return Err(self
                .refusal(job_id, |job| {
                    if job.status.can_transition_to(status) {
                        Ok(())
                    } else {
                        Err(AppError::NotEligible {
                            job_id,
                            status: job.status,
                            action: "finish a run",
                        })
                    }
                })
                .await);
        }
        Ok(())
    }

    async fn rollback(&self, job_id: Uuid, now: DateTime<Utc>) -> Result<u64, AppError> {
        let cutoff = now - TimeDelta::days(ROLLBACK_WINDOW_DAYS);
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        let updated = sqlx::query(
            r#"
            UPDATE bulk_attendance_jobs
            SET status = 'rollback'
            WHERE id = $1 AND status IN ('completed', 'failed') AND added_at >= $2
            "#,
        )
        .bind(job_id)
        .bind(cutoff)
        .execute(&mut *tx)
        .await
        .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        if updated.rows_affected() == 0 {
            tx.rollback()
                .await
                .map_err(|e| AppError::DatabaseError(e.to_string()))?;
            return Err(self.refusal(job_id, |job| job.check_rollback(now)).await);
        }

        let deleted = sqlx::query(r#"DELETE FROM attendance_records WHERE job_id = $1"#)
            .bind(job_id)
            .execute(&mut *tx)
            .await
            .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        tx.commit()
            .await
            .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        tracing::info!(%job_id, removed = deleted.rows_affected(), "Rolled back bulk job");
        Ok(deleted.rows_affected())
    }

    async fn soft_delete(&self, job_id: Uuid) -> Result<(), AppError> {
        let result = sqlx::query(
            r#"
            UPDATE bulk_attendance_jobs
            SET status = 'deleted', deleted_at = NOW()
            WHERE id = $1 AND status IN ('new', 'rollback')
            "#,
        )
        .bind(job_id)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        if result.rows_affected() == 0 {
            return Err(self.refusal(job_id, BulkJob::check_delete).await);
        }
        Ok(())
    }

    async fn count_by_status(&self, status: JobStatus) -> Result<i64, AppError> {
        let (count,): (i64,) =
            sqlx::query_as(r#"SELECT COUNT(*) FROM bulk_attendance_jobs WHERE status = $1"#)
                .bind(status.as_str())
                .fetch_one(&self.pool)
                .await
                .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        Ok(count)
    }
}
