//! The single ingestion worker.
//!
//! One job runs at a time. Start requests that arrive while a job is running
//! wait in an in-memory FIFO and are picked up, in order, as soon as the
//! current run ends. Stopping is cooperative: the run notices at the next
//! record boundary that it no longer owns the active slot and winds down.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::Utc;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::watch;
use uuid::Uuid;

use crate::config::IngestConfig;
use crate::error::{AppError, RecordError};
use crate::job::{BulkJob, JobStatus, RunSummary};
use crate::models::{EntryType, FailedEntry, FormatDescriptor, NewAttendanceRecord, PunchMode};
use crate::normalizer::FileNormalizer;
use crate::punch::PunchParser;
use crate::queue::QueueMessage;
use crate::traits::{
    AttendanceStore, BlobStore, DescriptorStore, EmployeeDirectory, IdleListener, JobRunner,
    JobStore, SheetConverter,
};

const STOPPED_REASON: &str = "manually stopped";
const DEQUEUED_REASON: &str = "stopped before processing started";

/// Events emitted by the worker and the queue consumer for monitoring/logging.
#[derive(Debug, Clone)]
pub enum WorkerEvent<'a> {
    Queued {
        job_id: Uuid,
        position: usize,
    },
    RunStarted {
        job_id: Uuid,
    },
    RunSkipped {
        job_id: Uuid,
        status: JobStatus,
    },
    RecordFailed {
        job_id: Uuid,
        row: usize,
        reason: &'a str,
    },
    StopRequested {
        job_id: Uuid,
    },
    Dequeued {
        job_id: Uuid,
    },
    RunFinished {
        job_id: Uuid,
        status: JobStatus,
        summary: &'a RunSummary,
    },
    Idle,
    ConsumerStarted {
        consumer_id: &'a str,
    },
    Polling,
    MessageClaimed {
        message: &'a QueueMessage,
    },
    MessageFailed {
        message_id: i64,
        error: &'a str,
    },
    ShuttingDown {
        consumer_id: &'a str,
        messages_released: u64,
    },
    Stopped {
        consumer_id: &'a str,
    },
}

/// Trait for receiving worker events (decoupled logging).
pub trait WorkerReporter: Send + Sync {
    fn report(&self, event: WorkerEvent<'_>) {
        let _ = event;
    }
}

/// Reporter that uses the `tracing` crate.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingWorkerReporter;

impl WorkerReporter for TracingWorkerReporter {
    fn report(&self, event: WorkerEvent<'_>) {
        match event {
            WorkerEvent::Queued { job_id, position } => {
                tracing::info!(%job_id, %position, "Job queued behind active run");
            }
            WorkerEvent::RunStarted { job_id } => {
                tracing::info!(%job_id, "Processing job");
            }
            WorkerEvent::RunSkipped { job_id, status } => {
                tracing::warn!(%job_id, %status, "Skipping job that is no longer processing");
            }
            WorkerEvent::RecordFailed {
                job_id,
                row,
                reason,
            } => {
                tracing::debug!(%job_id, %row, %reason, "Record failed");
            }
            WorkerEvent::StopRequested { job_id } => {
                tracing::info!(%job_id, "Stop requested for active job");
            }
            WorkerEvent::Dequeued { job_id } => {
                tracing::info!(%job_id, "Removed pending job");
            }
            WorkerEvent::RunFinished {
                job_id,
                status,
                summary,
            } => {
                tracing::info!(
                    %job_id,
                    %status,
                    total = summary.total_records,
                    processed = summary.processed(),
                    success = summary.success_count,
                    failed = summary.failed_count,
                    "Job finished"
                );
            }
            WorkerEvent::Idle => {
                tracing::info!("Worker idle");
            }
            WorkerEvent::ConsumerStarted { consumer_id } => {
                tracing::info!(%consumer_id, "Queue consumer started");
            }
            WorkerEvent::Polling => {
                tracing::debug!("Polling for messages");
            }
            WorkerEvent::MessageClaimed { message } => {
                tracing::info!(message_id = message.id, topic = %message.topic, "Message claimed");
            }
            WorkerEvent::MessageFailed { message_id, error } => {
                tracing::warn!(%message_id, %error, "Message could not be handled");
            }
            WorkerEvent::ShuttingDown {
                consumer_id,
                messages_released,
            } => {
                tracing::info!(%consumer_id, %messages_released, "Queue consumer shutting down");
            }
            WorkerEvent::Stopped { consumer_id } => {
                tracing::info!(%consumer_id, "Queue consumer stopped");
            }
        }
    }
}

/// Answer to a start request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    /// The worker was idle and began the run.
    Started,
    /// Another job is running; this one waits at the given queue position.
    Queued { position: usize },
    /// The job is already active or waiting.
    Ignored,
}

/// Answer to a stop request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    /// The active run will abort at its next record boundary.
    Stopping,
    /// The job was still waiting; it was removed and marked failed.
    Dequeued,
}

/// Live counters of the active run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Progress {
    pub total_records: u32,
    pub success_count: u32,
    pub failed_count: u32,
}

/// Point-in-time view of the worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WorkerSnapshot {
    pub active_job_id: Option<Uuid>,
    pub pending_job_ids: Vec<Uuid>,
    pub progress: Progress,
    pub running: bool,
}

#[derive(Debug, Default)]
struct WorkerState {
    active_job_id: Option<Uuid>,
    pending: VecDeque<Uuid>,
    /// True from the moment a run starts until the driver has nothing left
    /// to do. Stays set while a stopped run is still winding down.
    driver_running: bool,
    progress: Progress,
}

enum RecordOutcome {
    Succeeded,
    Failed,
}

struct Inner<J, D, A, E, B, S, L>
where
    J: JobStore,
    D: DescriptorStore,
    A: AttendanceStore,
    E: EmployeeDirectory,
    B: BlobStore,
    S: SheetConverter,
    L: IdleListener,
{
    jobs: J,
    descriptors: D,
    attendance: A,
    directory: E,
    normalizer: FileNormalizer<B, J, S>,
    idle: L,
    reporter: Arc<dyn WorkerReporter>,
    config: IngestConfig,
    state: Mutex<WorkerState>,
    idle_tx: watch::Sender<bool>,
}

/// Processes bulk jobs one at a time with a fixed delay between records.
pub struct IngestionWorker<J, D, A, E, B, S, L>
where
    J: JobStore,
    D: DescriptorStore,
    A: AttendanceStore,
    E: EmployeeDirectory,
    B: BlobStore,
    S: SheetConverter,
    L: IdleListener,
{
    inner: Arc<Inner<J, D, A, E, B, S, L>>,
}

impl<J, D, A, E, B, S, L> Clone for IngestionWorker<J, D, A, E, B, S, L>
where
    J: JobStore,
    D: DescriptorStore,
    A: AttendanceStore,
    E: EmployeeDirectory,
    B: BlobStore,
    S: SheetConverter,
    L: IdleListener,
{
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<J, D, A, E, B, S, L> IngestionWorker<J, D, A, E, B, S, L>
where
    J: JobStore + 'static,
    D: DescriptorStore + 'static,
    A: AttendanceStore + 'static,
    E: EmployeeDirectory + 'static,
    B: BlobStore + 'static,
    S: SheetConverter + 'static,
    L: IdleListener + 'static,
{
    pub fn new(
        jobs: J,
        descriptors: D,
        attendance: A,
        directory: E,
        normalizer: FileNormalizer<B, J, S>,
        idle: L,
        config: IngestConfig,
    ) -> Self {
        Self::with_reporter(
            jobs,
            descriptors,
            attendance,
            directory,
            normalizer,
            idle,
            config,
            Arc::new(TracingWorkerReporter),
        )
    }

    #[allow(clippy::too_many_arguments)]
    pub fn with_reporter(
        jobs: J,
        descriptors: D,
        attendance: A,
        directory: E,
        normalizer: FileNormalizer<B, J, S>,
        idle: L,
        config: IngestConfig,
        reporter: Arc<dyn WorkerReporter>,
    ) -> Self {
        let (idle_tx, _) = watch::channel(true);
        Self {
            inner: Arc::new(Inner {
                jobs,
                descriptors,
                attendance,
                directory,
                normalizer,
                idle,
                reporter,
                config,
                state: Mutex::new(WorkerState::default()),
                idle_tx,
            }),
        }
    }

    /// Start `job_id` now if the worker is idle, otherwise queue it.
    ///
    /// Returns immediately; the run happens on a spawned task.
    pub fn request_processing(&self, job_id: Uuid) -> StartOutcome {
        let outcome = {
            let mut state = self.inner.state();
            if state.active_job_id == Some(job_id) || state.pending.contains(&job_id) {
                StartOutcome::Ignored
            } else if state.active_job_id.is_none() && !state.driver_running {
                state.active_job_id = Some(job_id);
                state.driver_running = true;
                state.progress = Progress::default();
                self.inner.idle_tx.send_replace(false);
                StartOutcome::Started
            } else {
                state.pending.push_back(job_id);
                StartOutcome::Queued {
                    position: state.pending.len(),
                }
            }
        };

        match outcome {
            StartOutcome::Started => {
                tokio::spawn(Arc::clone(&self.inner).drive(job_id));
            }
            StartOutcome::Queued { position } => {
                self.inner
                    .reporter
                    .report(WorkerEvent::Queued { job_id, position });
            }
            StartOutcome::Ignored => {
                tracing::debug!(%job_id, "Ignoring duplicate start request");
            }
        }
        outcome
    }

    /// Stop `job_id`.
    ///
    /// The active job is aborted at its next record boundary and ends
    /// `force_stopped`. A pending job is removed and marked `failed` here.
    /// Anything else fails with [`AppError::NotRunning`].
    pub async fn request_stop(&self, job_id: Uuid) -> Result<StopOutcome, AppError> {
        let dequeued_at = {
            let mut state = self.inner.state();
            if state.active_job_id == Some(job_id) {
                state.active_job_id = None;
                None
            } else if let Some(position) = state.pending.iter().position(|id| *id == job_id) {
                state.pending.remove(position);
                Some(position)
            } else {
                return Err(AppError::NotRunning(job_id));
            }
        };

        let Some(position) = dequeued_at else {
            self.inner
                .reporter
                .report(WorkerEvent::StopRequested { job_id });
            return Ok(StopOutcome::Stopping);
        };

        let summary = RunSummary::aborted(0, DEQUEUED_REASON);
        if let Err(e) = self
            .inner
            .jobs
            .finish_run(job_id, JobStatus::Failed, &summary)
            .await
        {
            // Still `processing` in the store, so it must stay queued.
            let mut state = self.inner.state();
            let position = position.min(state.pending.len());
            state.pending.insert(position, job_id);
            return Err(e);
        }
        self.inner.reporter.report(WorkerEvent::Dequeued { job_id });
        Ok(StopOutcome::Dequeued)
    }

    pub fn snapshot(&self) -> WorkerSnapshot {
        let state = self.inner.state();
        WorkerSnapshot {
            active_job_id: state.active_job_id,
            pending_job_ids: state.pending.iter().copied().collect(),
            progress: state.progress,
            running: state.driver_running,
        }
    }

    /// Wait until no run is in progress and nothing is pending.
    pub async fn wait_idle(&self) {
        let mut idle = self.inner.idle_tx.subscribe();
        // The sender lives in `inner`, which `self` keeps alive.
        let _ = idle.wait_for(|idle| *idle).await;
    }
}

impl<J, D, A, E, B, S, L> JobRunner for IngestionWorker<J, D, A, E, B, S, L>
where
    J: JobStore + 'static,
    D: DescriptorStore + 'static,
    A: AttendanceStore + 'static,
    E: EmployeeDirectory + 'static,
    B: BlobStore + 'static,
    S: SheetConverter + 'static,
    L: IdleListener + 'static,
{
    fn request_processing(&self, job_id: Uuid) -> StartOutcome {
        IngestionWorker::request_processing(self, job_id)
    }

    async fn request_stop(&self, job_id: Uuid) -> Result<StopOutcome, AppError> {
        IngestionWorker::request_stop(self, job_id).await
    }
}

impl<J, D, A, E, B, S, L> Inner<J, D, A, E, B, S, L>
where
    J: JobStore + 'static,
    D: DescriptorStore + 'static,
    A: AttendanceStore + 'static,
    E: EmployeeDirectory + 'static,
    B: BlobStore + 'static,
    S: SheetConverter + 'static,
    L: IdleListener + 'static,
{
    fn state(&self) -> MutexGuard<'_, WorkerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn is_active(&self, job_id: Uuid) -> bool {
        self.state().active_job_id == Some(job_id)
    }

    fn record_progress(&self, summary: &RunSummary) {
        self.state().progress = Progress {
            total_records: summary.total_records,
            success_count: summary.success_count,
            failed_count: summary.failed_count,
        };
    }

    /// Hand the slot to the next pending job, or release it.
    fn advance(&self) -> Option<Uuid> {
        let mut state = self.state();
        state.progress = Progress::default();
        match state.pending.pop_front() {
            Some(next) => {
                state.active_job_id = Some(next);
                Some(next)
            }
            None => {
                state.active_job_id = None;
                state.driver_running = false;
                self.idle_tx.send_replace(true);
                None
            }
        }
    }

    async fn drive(self: Arc<Self>, first: Uuid) {
        let mut next = Some(first);
        while let Some(job_id) = next {
            self.run(job_id).await;
            next = self.advance();
        }
        self.reporter.report(WorkerEvent::Idle);
        self.idle.on_worker_idle().await;
    }

    async fn run(&self, job_id: Uuid) {
        let job = match self.jobs.get_job(job_id).await {
            Ok(Some(job)) => job,
            Ok(None) => {
                tracing::error!(%job_id, "Job disappeared before its run");
                return;
            }
            Err(e) => {
                tracing::error!(%job_id, error = %e, "Failed to load job");
                let summary = RunSummary::aborted(0, e.to_string());
                if let Err(e) = self.jobs.finish_run(job_id, JobStatus::Failed, &summary).await {
                    tracing::error!(%job_id, error = %e, "Failed to persist run result");
                }
                return;
            }
        };
        if job.status != JobStatus::Processing {
            self.reporter.report(WorkerEvent::RunSkipped {
                job_id,
                status: job.status,
            });
            return;
        }

        self.reporter.report(WorkerEvent::RunStarted { job_id });
        let mut summary = RunSummary::default();
        let status = match self.execute(&job, &mut summary).await {
            Ok(status) => status,
            Err(e) => {
                if !e.is_job_level() {
                    tracing::error!(%job_id, error = %e, "Run aborted by infrastructure error");
                }
                summary.failed_report.push(FailedEntry::job(e.to_string()));
                JobStatus::Failed
            }
        };

        if let Err(e) = self.jobs.finish_run(job_id, status, &summary).await {
            tracing::error!(%job_id, error = %e, "Failed to persist run result");
        }
        self.reporter.report(WorkerEvent::RunFinished {
            job_id,
            status,
            summary: &summary,
        });
    }

    async fn execute(&self, job: &BulkJob, summary: &mut RunSummary) -> Result<JobStatus, AppError> {
        let descriptor = self
            .descriptors
            .get_descriptor(job.format_descriptor_id)
            .await?
            .ok_or(AppError::NotFound {
                entity: "format descriptor",
                id: job.format_descriptor_id,
            })?;

        let normalized = self.normalizer.normalize(job).await?;
        let entry = &descriptor.entry_point_path;
        let records = entry
            .resolve(&normalized.document)
            .map_err(|_| {
                AppError::ConfigurationError(format!("Entry point '{entry}' does not resolve"))
            })?
            .as_array()
            .ok_or_else(|| {
                AppError::ConfigurationError(format!("Entry point '{entry}' is not an array"))
            })?;

        summary.total_records = u32::try_from(records.len()).unwrap_or(u32::MAX);
        self.jobs
            .set_total_records(job.id, summary.total_records)
            .await?;
        self.record_progress(summary);

        self.sanity_check(&descriptor, records)?;

        let parser = PunchParser::new(&self.config);
        for (row, record) in records.iter().enumerate() {
            if row > 0 && !self.config.throttle.is_zero() {
                tokio::time::sleep(self.config.throttle).await;
            }
            if !self.is_active(job.id) {
                summary.failed_report.push(FailedEntry::job(STOPPED_REASON));
                return Ok(JobStatus::ForceStopped);
            }

            match self
                .process_record(job.id, row, record, &descriptor, &parser, summary)
                .await
            {
                RecordOutcome::Succeeded => summary.success_count += 1,
                RecordOutcome::Failed => {
                    summary.failed_count += 1;
                    summary.failed_records.push(record.clone());
                }
            }
            self.record_progress(summary);
        }
        if !self.is_active(job.id) {
            summary.failed_report.push(FailedEntry::job(STOPPED_REASON));
            return Ok(JobStatus::ForceStopped);
        }
        Ok(JobStatus::Completed)
    }

    /// Fail fast when the employee number path matches none of the leading records.
    fn sanity_check(&self, descriptor: &FormatDescriptor, records: &[Value]) -> Result<(), AppError> {
        let sample = &records[..records.len().min(self.config.sanity_sample)];
        if sample.is_empty() {
            return Ok(());
        }
        let path = &descriptor.employee_number_path;
        if sample.iter().any(|record| path.resolve_text(record).is_ok()) {
            return Ok(());
        }
        Err(AppError::ConfigurationError(format!(
            "Employee number path '{path}' did not resolve on any of the first {} records",
            sample.len()
        )))
    }

    /// A record succeeds when at least one of its punches is stored.
    /// Failed punches of a successful record are still reported.
    async fn process_record(
        &self,
        job_id: Uuid,
        row: usize,
        record: &Value,
        descriptor: &FormatDescriptor,
        parser: &PunchParser,
        summary: &mut RunSummary,
    ) -> RecordOutcome {
        let employee = descriptor.employee_number_path.resolve_text(record).ok();
        let errors = match self
            .store_punches(job_id, record, employee.as_deref(), descriptor, parser)
            .await
        {
            Ok((stored, errors)) if stored > 0 => {
                self.report_errors(job_id, row, employee.as_deref(), errors, summary);
                return RecordOutcome::Succeeded;
            }
            Ok((_, errors)) => errors,
            Err(e) => vec![e],
        };
        self.report_errors(job_id, row, employee.as_deref(), errors, summary);
        RecordOutcome::Failed
    }

    /// Returns how many punches were stored plus the per-punch failures.
    /// A record-wide failure comes back as `Err`.
    async fn store_punches(
        &self,
        job_id: Uuid,
        record: &Value,
        employee: Option<&str>,
        descriptor: &FormatDescriptor,
        parser: &PunchParser,
    ) -> Result<(usize, Vec<RecordError>), RecordError> {
        let employee = employee.ok_or(RecordError::MissingField {
            field: "employee_number",
        })?;
        let date = descriptor
            .date_path
            .resolve(record)
            .map_err(|_| RecordError::MissingField { field: "date" })?;
        let time = descriptor
            .time_path
            .resolve(record)
            .map_err(|_| RecordError::MissingField { field: "time" })?;
        let marker = descriptor
            .mode_path
            .as_ref()
            .and_then(|path| path.resolve_text(record).ok())
            .and_then(|raw| PunchMode::from_marker(&raw));

        let user_id = match self.directory.find_user_id(employee).await {
            Ok(Some(user_id)) => user_id,
            Ok(None) => return Err(RecordError::UnknownEmployee(employee.to_string())),
            Err(e) => return Err(RecordError::LookupFailed(e.to_string())),
        };

        let candidates =
            parser.candidates(date, time, descriptor.time_value_type, marker, Utc::now())?;

        let mut stored = 0;
        let mut errors = Vec::new();
        for candidate in candidates {
            let candidate = match candidate {
                Ok(candidate) => candidate,
                Err(e) => {
                    errors.push(e);
                    continue;
                }
            };
            let punch = NewAttendanceRecord {
                user_id,
                check_in: candidate.check_in,
                mode: candidate.mode,
                entry_type: EntryType::Bulk,
                job_id: Some(job_id),
            };
            match self.attendance.upsert(&punch).await {
                // A duplicate is already stored, which is what we want.
                Ok(_) => stored += 1,
                Err(e) => errors.push(RecordError::WriteFailed(e.to_string())),
            }
        }
        Ok((stored, errors))
    }

    fn report_errors(
        &self,
        job_id: Uuid,
        row: usize,
        employee: Option<&str>,
        errors: Vec<RecordError>,
        summary: &mut RunSummary,
    ) {
        for error in errors {
            let reason = error.to_string();
            self.reporter.report(WorkerEvent::RecordFailed {
                job_id,
                row,
                reason: &reason,
            });
            summary
                .failed_report
                .push(FailedEntry::record(row, employee.map(str::to_string), reason));
        }
    }
}
