pub mod blob;
pub mod config;
pub mod consumer;
pub mod controller;
pub mod directory;
pub mod error;
pub mod job;
pub mod models;
pub mod normalizer;
pub mod path;
pub mod punch;
pub mod queue;
pub mod traits;
pub mod worker;

#[cfg(test)]
pub(crate) mod testutil;

pub use blob::FsBlobStore;
pub use config::{ConsumerConfig, IngestConfig};
pub use consumer::QueueConsumer;
pub use controller::JobController;
pub use directory::CachedDirectory;
pub use error::{AppError, RecordError};
pub use job::{BulkJob, CreateBulkJobRequest, JobStatus, RunSummary, StartDecision};
pub use models::{
    AttendanceRecord, EntryType, FailedEntry, FormatDescriptor, NewAttendanceRecord,
    NewFormatDescriptor, PunchMode, TimeValueType, compute_hash,
};
pub use normalizer::{FileNormalizer, NoSheetConverter};
pub use path::FieldPath;
pub use queue::{JobMessage, QueueGateway, QueueIdleListener, QueueMessage};
pub use traits::{
    AttendanceStore, BlobStore, DescriptorStore, EmployeeDirectory, IdleListener, JobRunner,
    JobStore, SheetConverter,
};
pub use worker::{
    IngestionWorker, StartOutcome, StopOutcome, TracingWorkerReporter, WorkerEvent,
    WorkerReporter, WorkerSnapshot,
};
