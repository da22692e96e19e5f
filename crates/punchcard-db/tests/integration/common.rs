use punchcard_core::job::CreateBulkJobRequest;
use punchcard_core::models::{FormatDescriptor, NewFormatDescriptor};
use punchcard_core::path::FieldPath;
use punchcard_core::traits::DescriptorStore;
use punchcard_db::{Database, DescriptorRepository};
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use testcontainers::core::{ContainerPort, WaitFor};
use testcontainers::runners::AsyncRunner;
use testcontainers::{ContainerAsync, GenericImage, ImageExt};

/// Spins up a PostgreSQL container, runs the embedded migrations and
/// returns a connected pool.
///
/// The `ContainerAsync` must be kept in scope for the test duration;
/// dropping it stops the container.
pub async fn setup_test_db() -> (PgPool, ContainerAsync<GenericImage>) {
    let container = GenericImage::new("postgres", "16")
        .with_exposed_port(ContainerPort::Tcp(5432))
        .with_wait_for(WaitFor::message_on_stderr(
            "database system is ready to accept connections",
        ))
        .with_env_var("POSTGRES_PASSWORD", "postgres")
        .with_env_var("POSTGRES_DB", "punchcard_test")
        .start()
        .await
        .expect("Failed to start PostgreSQL container");

    let host = container.get_host().await.expect("Failed to get host");
    let port = container
        .get_host_port_ipv4(5432)
        .await
        .expect("Failed to get port");

    let connection_string =
        format!("postgresql://postgres:postgres@{host}:{port}/punchcard_test");

    // Retry connection until container is fully ready
    const MAX_RETRIES: u32 = 30;
    let mut retries = 0;
    let pool = loop {
        match PgPoolOptions::new()
            .max_connections(5)
            .connect(&connection_string)
            .await
        {
            Ok(pool) => break pool,
            Err(e) => {
                retries += 1;
                if retries >= MAX_RETRIES {
                    panic!("Failed to connect to database after {MAX_RETRIES} retries: {e}");
                }
                tokio::time::sleep(std::time::Duration::from_millis(100)).await;
            }
        }
    };

    Database::from_pool(pool.clone())
        .migrate()
        .await
        .expect("Failed to run migrations");

    (pool, container)
}

pub async fn create_descriptor(pool: &PgPool) -> FormatDescriptor {
    DescriptorRepository::new(pool.clone())
        .create_descriptor(&NewFormatDescriptor {
            name: "flat export".into(),
            entry_point_path: FieldPath::root(),
            employee_number_path: FieldPath::from(vec!["emp"]),
            date_path: FieldPath::from(vec!["date"]),
            time_path: FieldPath::from(vec!["time"]),
            mode_path: None,
            time_value_type: Default::default(),
        })
        .await
        .expect("Failed to create descriptor")
}

pub fn job_request(descriptor: &FormatDescriptor) -> CreateBulkJobRequest {
    CreateBulkJobRequest::new("uploads/test/punches.csv", "abc123", descriptor.id)
}
