use sqlx::PgPool;
use uuid::Uuid;

use punchcard_core::error::AppError;
use punchcard_core::traits::EmployeeDirectory;

/// Employee directory backed by the `employees` table.
#[derive(Clone)]
pub struct EmployeeRepository {
    pool: PgPool,
}

impl EmployeeRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Register an employee number, or rename an existing one. Returns the user id.
    pub async fn upsert(
        &self,
        employee_number: &str,
        full_name: Option<&str>,
    ) -> Result<Uuid, AppError> {
        let (user_id,): (Uuid,) = sqlx::query_as(
            r#"
            INSERT INTO employees (employee_number, full_name)
            VALUES ($1, $2)
            ON CONFLICT (employee_number)
            DO UPDATE SET full_name = COALESCE(EXCLUDED.full_name, employees.full_name)
            RETURNING user_id
            "#,
        )
        .bind(employee_number.trim())
        .bind(full_name)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        Ok(user_id)
    }
}

impl EmployeeDirectory for EmployeeRepository {
    async fn find_user_id(&self, employee_number: &str) -> Result<Option<Uuid>, AppError> {
        let row: Option<(Uuid,)> =
            sqlx::query_as(r#"SELECT user_id FROM employees WHERE employee_number = $1"#)
                .bind(employee_number.trim())
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| AppError::DatabaseError(e.to_string()))?;

        Ok(row.map(|(user_id,)| user_id))
    }
}
