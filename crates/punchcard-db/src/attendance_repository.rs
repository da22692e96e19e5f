use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use punchcard_core::error::AppError;
use punchcard_core::models::{AttendanceRecord, EntryType, NewAttendanceRecord, PunchMode};
use punchcard_core::traits::AttendanceStore;

/// Repository for attendance punches.
#[derive(Clone)]
pub struct AttendanceRepository {
    pool: PgPool,
}

impl AttendanceRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Punches written by a bulk job, oldest first.
    pub async fn list_for_job(&self, job_id: Uuid) -> Result<Vec<AttendanceRecord>, AppError> {
        let rows = sqlx::query_as::<_, AttendanceRow>(
            r#"
            SELECT id, user_id, check_in, mode, entry_type, job_id, added_at
            FROM attendance_records
            WHERE job_id = $1
            ORDER BY check_in ASC
            "#,
        )
        .bind(job_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        Ok(rows.into_iter().map(Into::into).collect())
    }

    pub async fn count_for_user(&self, user_id: Uuid) -> Result<i64, AppError> {
        let (count,): (i64,) =
            sqlx::query_as(r#"SELECT COUNT(*) FROM attendance_records WHERE user_id = $1"#)
                .bind(user_id)
                .fetch_one(&self.pool)
                .await
                .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        Ok(count)
    }
}

// -- Internal row type for sqlx deserialization --

#[derive(sqlx::FromRow)]
struct AttendanceRow {
    id: Uuid,
    user_id: Uuid,
    check_in: DateTime<Utc>,
    mode: String,
    entry_type: String,
    job_id: Option<Uuid>,
    added_at: DateTime<Utc>,
}

impl From<AttendanceRow> for AttendanceRecord {
    fn from(row: AttendanceRow) -> Self {
        AttendanceRecord {
            id: row.id,
            user_id: row.user_id,
            check_in: row.check_in,
            mode: row.mode.parse().unwrap_or(PunchMode::In),
            entry_type: row.entry_type.parse().unwrap_or(EntryType::Manual),
            job_id: row.job_id,
            added_at: row.added_at,
        }
    }
}

impl AttendanceStore for AttendanceRepository {
    async fn upsert(&self, record: &NewAttendanceRecord) -> Result<bool, AppError> {
        let result = sqlx::query(
            r#"
            INSERT INTO attendance_records (user_id, check_in, mode, entry_type, job_id)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (user_id, check_in) DO NOTHING
            "#,
        )
        .bind(record.user_id)
        .bind(record.check_in)
        .bind(record.mode.as_str())
        .bind(record.entry_type.as_str())
        .bind(record.job_id)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        Ok(result.rows_affected() == 1)
    }
}
