//! Test utilities: mock implementations of all core traits.
//!
//! Handwritten mocks for dependency injection in unit tests.
//! All mocks use `Arc<Mutex<_>>` for interior mutability, allowing
//! test assertions on recorded calls.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::AppError;
use crate::job::{BulkJob, CreateBulkJobRequest, JobStatus, RunSummary};
use crate::models::{FormatDescriptor, NewAttendanceRecord, NewFormatDescriptor, TimeValueType};
use crate::path::FieldPath;
use crate::queue::{QueueGateway, QueueMessage};
use crate::traits::{
    AttendanceStore, BlobStore, DescriptorStore, EmployeeDirectory, IdleListener, JobRunner,
    JobStore,
};
use crate::worker::{StartOutcome, StopOutcome, WorkerEvent, WorkerReporter};

// ---------------------------------------------------------------------------
// MockJobStore
// ---------------------------------------------------------------------------

/// Mock job store backed by an in-memory Vec.
#[derive(Clone)]
pub struct MockJobStore {
    jobs: Arc<Mutex<Vec<BulkJob>>>,
    /// Punches each job "wrote", consumed by `rollback`.
    attendance: Arc<Mutex<HashMap<Uuid, u64>>>,
    fail_get_job: Arc<Mutex<bool>>,
    fail_finish_run: Arc<Mutex<bool>>,
}

impl MockJobStore {
    pub fn empty() -> Self {
        Self {
            jobs: Arc::new(Mutex::new(Vec::new())),
            attendance: Arc::new(Mutex::new(HashMap::new())),
            fail_get_job: Arc::new(Mutex::new(false)),
            fail_finish_run: Arc::new(Mutex::new(false)),
        }
    }

    pub fn with_job(job: BulkJob) -> Self {
        let store = Self::empty();
        store.insert(job);
        store
    }

    pub fn insert(&self, job: BulkJob) {
        self.jobs.lock().unwrap().push(job);
    }

    pub fn job(&self, job_id: Uuid) -> Option<BulkJob> {
        self.jobs
            .lock()
            .unwrap()
            .iter()
            .find(|j| j.id == job_id)
            .cloned()
    }

    pub fn set_status(&self, job_id: Uuid, status: JobStatus) {
        self.update(job_id, |job| job.status = status);
    }

    pub fn set_attendance_count(&self, job_id: Uuid, count: u64) {
        self.attendance.lock().unwrap().insert(job_id, count);
    }

    /// Make `get_job` fail with a database error.
    pub fn fail_get_job(&self, fail: bool) {
        *self.fail_get_job.lock().unwrap() = fail;
    }

    /// Make `finish_run` fail with a database error.
    pub fn fail_finish_run(&self, fail: bool) {
        *self.fail_finish_run.lock().unwrap() = fail;
    }

    fn update(&self, job_id: Uuid, f: impl FnOnce(&mut BulkJob)) -> bool {
        let mut jobs = self.jobs.lock().unwrap();
        match jobs.iter_mut().find(|j| j.id == job_id) {
            Some(job) => {
                f(job);
                true
            }
            None => false,
        }
    }
}

impl JobStore for MockJobStore {
    async fn create_job(&self, request: CreateBulkJobRequest) -> Result<BulkJob, AppError> {
        let job = BulkJob {
            source_file: request.source_file,
            source_hash: request.source_hash,
            format_descriptor_id: request.format_descriptor_id,
            ..make_test_job()
        };
        self.insert(job.clone());
        Ok(job)
    }

    async fn get_job(&self, job_id: Uuid) -> Result<Option<BulkJob>, AppError> {
        if *self.fail_get_job.lock().unwrap() {
            return Err(AppError::DatabaseError("connection reset".into()));
        }
        Ok(self.job(job_id))
    }

    async fn list_jobs(
        &self,
        status: Option<JobStatus>,
        limit: usize,
    ) -> Result<Vec<BulkJob>, AppError> {
        let jobs = self.jobs.lock().unwrap();
        let mut filtered: Vec<_> = jobs
            .iter()
            .filter(|j| match status {
                Some(s) => j.status == s,
                None => j.status != JobStatus::Deleted,
            })
            .cloned()
            .collect();
        filtered.sort_by(|a, b| b.added_at.cmp(&a.added_at));
        filtered.truncate(limit);
        Ok(filtered)
    }

    async fn mark_processing(&self, job_id: Uuid) -> Result<bool, AppError> {
        let mut moved = false;
        self.update(job_id, |job| {
            if job.status == JobStatus::New {
                job.status = JobStatus::Processing;
                job.started_at = Some(Utc::now());
                moved = true;
            }
        });
        Ok(moved)
    }

    async fn set_normalized_file(&self, job_id: Uuid, key: &str) -> Result<(), AppError> {
        self.update(job_id, |job| job.normalized_file = Some(key.to_string()));
        Ok(())
    }

    async fn set_total_records(&self, job_id: Uuid, total: u32) -> Result<(), AppError> {
        self.update(job_id, |job| job.total_records = total);
        Ok(())
    }

    async fn finish_run(
        &self,
        job_id: Uuid,
        status: JobStatus,
        summary: &RunSummary,
    ) -> Result<(), AppError> {
        if *self.fail_finish_run.lock().unwrap() {
            return Err(AppError::DatabaseError("connection reset".into()));
        }
        let found = self.update(job_id, |job| {
            job.status = status;
            job.total_records = summary.total_records;
            job.success_count = summary.success_count;
            job.failed_count = summary.failed_count;
            job.failed_records = summary.failed_records.clone();
            job.failed_report = summary.failed_report.clone();
            job.completed_at = Some(Utc::now());
        });
        if found {
            Ok(())
        } else {
            Err(AppError::NotFound {
                entity: "job",
                id: job_id,
            })
        }
    }

    async fn rollback(&self, job_id: Uuid, _now: DateTime<Utc>) -> Result<u64, AppError> {
        self.update(job_id, |job| job.status = JobStatus::Rollback);
        Ok(self
            .attendance
            .lock()
            .unwrap()
            .remove(&job_id)
            .unwrap_or(0))
    }

    async fn soft_delete(&self, job_id: Uuid) -> Result<(), AppError> {
        self.update(job_id, |job| {
            job.status = JobStatus::Deleted;
            job.deleted_at = Some(Utc::now());
        });
        Ok(())
    }

    async fn count_by_status(&self, status: JobStatus) -> Result<i64, AppError> {
        let jobs = self.jobs.lock().unwrap();
        Ok(jobs.iter().filter(|j| j.status == status).count() as i64)
    }
}

// ---------------------------------------------------------------------------
// MockDescriptorStore
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct MockDescriptorStore {
    descriptors: Arc<Mutex<Vec<FormatDescriptor>>>,
}

impl MockDescriptorStore {
    pub fn empty() -> Self {
        Self {
            descriptors: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn add(&self, descriptor: FormatDescriptor) -> FormatDescriptor {
        self.descriptors.lock().unwrap().push(descriptor.clone());
        descriptor
    }

    pub fn get(&self, id: Uuid) -> Option<FormatDescriptor> {
        self.descriptors
            .lock()
            .unwrap()
            .iter()
            .find(|d| d.id == id)
            .cloned()
    }
}

impl DescriptorStore for MockDescriptorStore {
    async fn create_descriptor(
        &self,
        descriptor: &NewFormatDescriptor,
    ) -> Result<FormatDescriptor, AppError> {
        Ok(self.add(FormatDescriptor {
            id: Uuid::new_v4(),
            name: descriptor.name.clone(),
            entry_point_path: descriptor.entry_point_path.clone(),
            employee_number_path: descriptor.employee_number_path.clone(),
            date_path: descriptor.date_path.clone(),
            time_path: descriptor.time_path.clone(),
            mode_path: descriptor.mode_path.clone(),
            time_value_type: descriptor.time_value_type,
            created_at: Utc::now(),
        }))
    }

    async fn get_descriptor(&self, id: Uuid) -> Result<Option<FormatDescriptor>, AppError> {
        Ok(self.get(id))
    }
}

// ---------------------------------------------------------------------------
// MockAttendanceStore
// ---------------------------------------------------------------------------

/// Mock attendance table, unique on `(user_id, check_in)`.
#[derive(Clone)]
pub struct MockAttendanceStore {
    records: Arc<Mutex<Vec<NewAttendanceRecord>>>,
    keys: Arc<Mutex<HashSet<(Uuid, DateTime<Utc>)>>>,
}

impl MockAttendanceStore {
    pub fn new() -> Self {
        Self {
            records: Arc::new(Mutex::new(Vec::new())),
            keys: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    pub fn count(&self) -> usize {
        self.records.lock().unwrap().len()
    }

    pub fn records(&self) -> Vec<NewAttendanceRecord> {
        self.records.lock().unwrap().clone()
    }
}

impl AttendanceStore for MockAttendanceStore {
    async fn upsert(&self, record: &NewAttendanceRecord) -> Result<bool, AppError> {
        if !self
            .keys
            .lock()
            .unwrap()
            .insert((record.user_id, record.check_in))
        {
            return Ok(false);
        }
        self.records.lock().unwrap().push(record.clone());
        Ok(true)
    }
}

// ---------------------------------------------------------------------------
// MockDirectory
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct MockDirectory {
    employees: Arc<Mutex<HashMap<String, Uuid>>>,
    lookups: Arc<Mutex<usize>>,
}

impl MockDirectory {
    pub fn empty() -> Self {
        Self {
            employees: Arc::new(Mutex::new(HashMap::new())),
            lookups: Arc::new(Mutex::new(0)),
        }
    }

    pub fn with_employee(employee_number: &str, user_id: Uuid) -> Self {
        let directory = Self::empty();
        directory.add(employee_number, user_id);
        directory
    }

    pub fn add(&self, employee_number: &str, user_id: Uuid) {
        self.employees
            .lock()
            .unwrap()
            .insert(employee_number.to_string(), user_id);
    }

    pub fn lookups(&self) -> usize {
        *self.lookups.lock().unwrap()
    }
}

impl EmployeeDirectory for MockDirectory {
    async fn find_user_id(&self, employee_number: &str) -> Result<Option<Uuid>, AppError> {
        *self.lookups.lock().unwrap() += 1;
        Ok(self.employees.lock().unwrap().get(employee_number).copied())
    }
}

// ---------------------------------------------------------------------------
// MockBlobStore
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct MockBlobStore {
    blobs: Arc<Mutex<HashMap<String, Vec<u8>>>>,
    puts: Arc<Mutex<usize>>,
}

impl MockBlobStore {
    pub fn new() -> Self {
        Self {
            blobs: Arc::new(Mutex::new(HashMap::new())),
            puts: Arc::new(Mutex::new(0)),
        }
    }

    /// Seed a blob without counting it as a `put`.
    pub fn insert(&self, key: &str, bytes: &[u8]) {
        self.blobs
            .lock()
            .unwrap()
            .insert(key.to_string(), bytes.to_vec());
    }

    pub fn contains(&self, key: &str) -> bool {
        self.blobs.lock().unwrap().contains_key(key)
    }

    pub fn put_count(&self) -> usize {
        *self.puts.lock().unwrap()
    }
}

impl BlobStore for MockBlobStore {
    async fn get(&self, key: &str) -> Result<Vec<u8>, AppError> {
        self.blobs
            .lock()
            .unwrap()
            .get(key)
            .cloned()
            .ok_or_else(|| AppError::SourceNotFound(key.to_string()))
    }

    async fn put(&self, key: &str, bytes: Vec<u8>) -> Result<String, AppError> {
        *self.puts.lock().unwrap() += 1;
        self.insert(key, &bytes);
        Ok(key.to_string())
    }
}

// ---------------------------------------------------------------------------
// MockQueue
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
enum Delivery {
    Pending,
    Claimed(String),
    Done,
}

/// Mock durable queue backed by an in-memory Vec.
#[derive(Clone)]
pub struct MockQueue {
    messages: Arc<Mutex<Vec<(QueueMessage, Delivery)>>>,
    released: Arc<Mutex<Vec<String>>>,
}

impl MockQueue {
    pub fn new() -> Self {
        Self {
            messages: Arc::new(Mutex::new(Vec::new())),
            released: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn push(&self, topic: &str, payload: serde_json::Value) -> i64 {
        let mut messages = self.messages.lock().unwrap();
        let id = messages.len() as i64 + 1;
        messages.push((
            QueueMessage {
                id,
                topic: topic.to_string(),
                payload,
                created_at: Utc::now(),
            },
            Delivery::Pending,
        ));
        id
    }

    /// Topics of every message ever enqueued, in order.
    pub fn topics(&self) -> Vec<String> {
        let messages = self.messages.lock().unwrap();
        messages.iter().map(|(m, _)| m.topic.clone()).collect()
    }

    pub fn payloads(&self) -> Vec<serde_json::Value> {
        let messages = self.messages.lock().unwrap();
        messages.iter().map(|(m, _)| m.payload.clone()).collect()
    }

    pub fn pending_count(&self) -> usize {
        let messages = self.messages.lock().unwrap();
        messages
            .iter()
            .filter(|(_, d)| *d == Delivery::Pending)
            .count()
    }

    pub fn acked(&self) -> Vec<i64> {
        let messages = self.messages.lock().unwrap();
        messages
            .iter()
            .filter(|(_, d)| *d == Delivery::Done)
            .map(|(m, _)| m.id)
            .collect()
    }

    pub fn released(&self) -> Vec<String> {
        self.released.lock().unwrap().clone()
    }
}

impl QueueGateway for MockQueue {
    async fn enqueue(&self, topic: &str, payload: serde_json::Value) -> Result<i64, AppError> {
        Ok(self.push(topic, payload))
    }

    async fn claim(
        &self,
        consumer_id: &str,
        topics: &[&str],
    ) -> Result<Option<QueueMessage>, AppError> {
        let mut messages = self.messages.lock().unwrap();
        let next = messages
            .iter_mut()
            .find(|(m, d)| *d == Delivery::Pending && topics.contains(&m.topic.as_str()));
        Ok(next.map(|(message, delivery)| {
            *delivery = Delivery::Claimed(consumer_id.to_string());
            message.clone()
        }))
    }

    async fn ack(&self, message_id: i64) -> Result<(), AppError> {
        let mut messages = self.messages.lock().unwrap();
        if let Some((_, delivery)) = messages.iter_mut().find(|(m, _)| m.id == message_id) {
            *delivery = Delivery::Done;
        }
        Ok(())
    }

    async fn release_consumer(&self, consumer_id: &str) -> Result<u64, AppError> {
        self.released.lock().unwrap().push(consumer_id.to_string());
        let mut messages = self.messages.lock().unwrap();
        let mut count = 0u64;
        for (_, delivery) in messages.iter_mut() {
            if *delivery == Delivery::Claimed(consumer_id.to_string()) {
                *delivery = Delivery::Pending;
                count += 1;
            }
        }
        Ok(count)
    }
}

// ---------------------------------------------------------------------------
// MockRunner
// ---------------------------------------------------------------------------

/// Mock worker that records commands. Stopping a job it never started
/// fails with `NotRunning`.
#[derive(Clone, Default)]
pub struct MockRunner {
    started: Arc<Mutex<Vec<Uuid>>>,
    stopped: Arc<Mutex<Vec<Uuid>>>,
}

impl MockRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn started(&self) -> Vec<Uuid> {
        self.started.lock().unwrap().clone()
    }

    pub fn stopped(&self) -> Vec<Uuid> {
        self.stopped.lock().unwrap().clone()
    }
}

impl JobRunner for MockRunner {
    fn request_processing(&self, job_id: Uuid) -> StartOutcome {
        self.started.lock().unwrap().push(job_id);
        StartOutcome::Started
    }

    async fn request_stop(&self, job_id: Uuid) -> Result<StopOutcome, AppError> {
        if !self.started.lock().unwrap().contains(&job_id) {
            return Err(AppError::NotRunning(job_id));
        }
        self.stopped.lock().unwrap().push(job_id);
        Ok(StopOutcome::Stopping)
    }
}

// ---------------------------------------------------------------------------
// MockIdleListener
// ---------------------------------------------------------------------------

#[derive(Clone, Default)]
pub struct MockIdleListener {
    calls: Arc<Mutex<usize>>,
}

impl MockIdleListener {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> usize {
        *self.calls.lock().unwrap()
    }
}

impl IdleListener for MockIdleListener {
    async fn on_worker_idle(&self) {
        *self.calls.lock().unwrap() += 1;
    }
}

// ---------------------------------------------------------------------------
// MockReporter
// ---------------------------------------------------------------------------

/// Mock worker reporter that records events.
#[derive(Default)]
pub struct MockReporter {
    pub events: Arc<Mutex<Vec<String>>>,
}

impl MockReporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn labels(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }
}

impl WorkerReporter for MockReporter {
    fn report(&self, event: WorkerEvent<'_>) {
        let label = match &event {
            WorkerEvent::Queued { .. } => "Queued",
            WorkerEvent::RunStarted { .. } => "RunStarted",
            WorkerEvent::RunSkipped { .. } => "RunSkipped",
            WorkerEvent::RecordFailed { .. } => "RecordFailed",
            WorkerEvent::StopRequested { .. } => "StopRequested",
            WorkerEvent::Dequeued { .. } => "Dequeued",
            WorkerEvent::RunFinished { .. } => "RunFinished",
            WorkerEvent::Idle => "Idle",
            WorkerEvent::ConsumerStarted { .. } => "ConsumerStarted",
            WorkerEvent::Polling => "Polling",
            WorkerEvent::MessageClaimed { .. } => "MessageClaimed",
            WorkerEvent::MessageFailed { .. } => "MessageFailed",
            WorkerEvent::ShuttingDown { .. } => "ShuttingDown",
            WorkerEvent::Stopped { .. } => "Stopped",
        };
        self.events.lock().unwrap().push(label.to_string());
    }
}

// ---------------------------------------------------------------------------
// Test helpers
// ---------------------------------------------------------------------------

/// Create a dummy `new` BulkJob for testing.
pub fn make_test_job() -> BulkJob {
    BulkJob {
        id: Uuid::new_v4(),
        source_file: "uploads/test/punches.csv".to_string(),
        source_hash: "abc123".to_string(),
        normalized_file: None,
        status: JobStatus::New,
        total_records: 0,
        success_count: 0,
        failed_count: 0,
        failed_records: Vec::new(),
        failed_report: Vec::new(),
        format_descriptor_id: Uuid::new_v4(),
        added_at: Utc::now(),
        started_at: None,
        completed_at: None,
        deleted_at: None,
    }
}

/// Descriptor for flat rows shaped `{"emp": .., "date": .., "time": ..}`.
pub fn make_test_descriptor() -> FormatDescriptor {
    FormatDescriptor {
        id: Uuid::new_v4(),
        name: "flat export".to_string(),
        entry_point_path: FieldPath::root(),
        employee_number_path: FieldPath::from(vec!["emp"]),
        date_path: FieldPath::from(vec!["date"]),
        time_path: FieldPath::from(vec!["time"]),
        mode_path: None,
        time_value_type: TimeValueType::Single,
        created_at: Utc::now(),
    }
}
