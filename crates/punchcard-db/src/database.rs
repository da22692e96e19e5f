use punchcard_core::AppError;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;

use crate::attendance_repository::AttendanceRepository;
use crate::config::DatabaseConfig;
use crate::descriptor_repository::DescriptorRepository;
use crate::employee_repository::EmployeeRepository;
use crate::job_repository::BulkJobRepository;
use crate::queue_repository::QueueRepository;

/// Central database facade: owns the connection pool, runs migrations,
/// and vends repository instances.
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    /// Connect to PostgreSQL with the given configuration.
    pub async fn connect(config: &DatabaseConfig) -> Result<Self, AppError> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .connect(&config.url)
            .await
            .map_err(|e| AppError::DatabaseError(format!("Failed to connect: {e}")))?;

        Ok(Self { pool })
    }

    /// Create a `Database` from an existing pool (useful for testing).
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Run all pending migrations.
    pub async fn migrate(&self) -> Result<(), AppError> {
        sqlx::migrate!("../../migrations")
            .run(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(format!("Migration failed: {e}")))?;
        tracing::info!("Database migrations applied");
        Ok(())
    }

    pub fn job_repo(&self) -> BulkJobRepository {
        BulkJobRepository::new(self.pool.clone())
    }

    pub fn descriptor_repo(&self) -> DescriptorRepository {
        DescriptorRepository::new(self.pool.clone())
    }

    pub fn attendance_repo(&self) -> AttendanceRepository {
        AttendanceRepository::new(self.pool.clone())
    }

    pub fn employee_repo(&self) -> EmployeeRepository {
        EmployeeRepository::new(self.pool.clone())
    }

    pub fn queue_repo(&self) -> QueueRepository {
        QueueRepository::new(self.pool.clone())
    }

    /// Get a reference to the underlying pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}
