use chrono::{DateTime, Utc};
use sqlx::PgPool;
use sqlx::types::Json;
use uuid::Uuid;

use punchcard_core::error::AppError;
use punchcard_core::models::{FormatDescriptor, NewFormatDescriptor, TimeValueType};
use punchcard_core::path::FieldPath;
use punchcard_core::traits::DescriptorStore;

/// Repository for format descriptors.
#[derive(Clone)]
pub struct DescriptorRepository {
    pool: PgPool,
}

impl DescriptorRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// All descriptors, newest first.
    pub async fn list(&self, limit: usize) -> Result<Vec<FormatDescriptor>, AppError> {
        let rows = sqlx::query_as::<_, DescriptorRow>(
            r#"
            SELECT * FROM format_descriptors
            ORDER BY created_at DESC
            LIMIT $1
            "#,
        )
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        Ok(rows.into_iter().map(Into::into).collect())
    }
}

// -- Internal row type for sqlx deserialization --

#[derive(sqlx::FromRow)]
struct DescriptorRow {
    id: Uuid,
    name: String,
    entry_point_path: Json<FieldPath>,
    employee_number_path: Json<FieldPath>,
    date_path: Json<FieldPath>,
    time_path: Json<FieldPath>,
    mode_path: Option<Json<FieldPath>>,
    time_value_type: String,
    created_at: DateTime<Utc>,
}

impl From<DescriptorRow> for FormatDescriptor {
    fn from(row: DescriptorRow) -> Self {
        FormatDescriptor {
            id: row.id,
            name: row.name,
            entry_point_path: row.entry_point_path.0,
            employee_number_path: row.employee_number_path.0,
            date_path: row.date_path.0,
            time_path: row.time_path.0,
            mode_path: row.mode_path.map(|path| path.0),
            time_value_type: row.time_value_type.parse().unwrap_or(TimeValueType::Single),
            created_at: row.created_at,
        }
    }
}

impl DescriptorStore for DescriptorRepository {
    async fn create_descriptor(
        &self,
        descriptor: &NewFormatDescriptor,
    ) -> Result<FormatDescriptor, AppError> {
        let row = sqlx::query_as::<_, DescriptorRow>(
            r#"
            INSERT INTO format_descriptors
                (name, entry_point_path, employee_number_path, date_path, time_path,
                 mode_path, time_value_type)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING *
            "#,
        )
        .bind(&descriptor.name)
        .bind(Json(&descriptor.entry_point_path))
        .bind(Json(&descriptor.employee_number_path))
        .bind(Json(&descriptor.date_path))
        .bind(Json(&descriptor.time_path))
        .bind(descriptor.mode_path.as_ref().map(Json))
        .bind(descriptor.time_value_type.as_str())
        .fetch_one(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        Ok(row.into())
    }

    async fn get_descriptor(&self, id: Uuid) -> Result<Option<FormatDescriptor>, AppError> {
        let row =
            sqlx::query_as::<_, DescriptorRow>(r#"SELECT * FROM format_descriptors WHERE id = $1"#)
                .bind(id)
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        Ok(row.map(Into::into))
    }
}
