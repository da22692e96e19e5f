pub mod attendance_repository;
pub mod config;
pub mod database;
pub mod descriptor_repository;
pub mod employee_repository;
pub mod job_repository;
pub mod queue_repository;

pub use attendance_repository::AttendanceRepository;
pub use config::DatabaseConfig;
pub use database::Database;
pub use descriptor_repository::DescriptorRepository;
pub use employee_repository::EmployeeRepository;
pub use job_repository::BulkJobRepository;
pub use queue_repository::QueueRepository;
