//! Operator-facing lifecycle operations.
//!
//! The controller checks preconditions and talks to the worker only through
//! the durable queue, so it can run in a different process than the worker.

use chrono::Utc;
use uuid::Uuid;

use crate::error::AppError;
use crate::job::{BulkJob, CreateBulkJobRequest, JobStatus, StartDecision};
use crate::models::{FormatDescriptor, NewFormatDescriptor, compute_hash};
use crate::queue::{JobMessage, QueueGateway, TOPIC_START, TOPIC_STOP};
use crate::traits::{BlobStore, DescriptorStore, JobStore};

#[derive(Clone)]
pub struct JobController<J, D, B, Q>
where
    J: JobStore,
    D: DescriptorStore,
    B: BlobStore,
    Q: QueueGateway,
{
    jobs: J,
    descriptors: D,
    blobs: B,
    queue: Q,
}

impl<J, D, B, Q> JobController<J, D, B, Q>
where
    J: JobStore,
    D: DescriptorStore,
    B: BlobStore,
    Q: QueueGateway,
{
    pub fn new(jobs: J, descriptors: D, blobs: B, queue: Q) -> Self {
        Self {
            jobs,
            descriptors,
            blobs,
            queue,
        }
    }

    /// Validate and store a new format descriptor.
    pub async fn register_descriptor(
        &self,
        descriptor: &NewFormatDescriptor,
    ) -> Result<FormatDescriptor, AppError> {
        if descriptor.name.trim().is_empty() {
            return Err(AppError::ConfigurationError(
                "Descriptor name must not be empty".into(),
            ));
        }
        for (field, path) in [
            ("employee number", &descriptor.employee_number_path),
            ("date", &descriptor.date_path),
            ("time", &descriptor.time_path),
        ] {
            if path.is_root() {
                return Err(AppError::ConfigurationError(format!(
                    "The {field} path must name a field"
                )));
            }
        }
        let created = self.descriptors.create_descriptor(descriptor).await?;
        tracing::info!(descriptor_id = %created.id, name = %created.name, "Registered format descriptor");
        Ok(created)
    }

    /// Store an upload and create a `new` job for it.
    pub async fn submit(
        &self,
        bytes: Vec<u8>,
        file_name: &str,
        format_descriptor_id: Uuid,
    ) -> Result<BulkJob, AppError> {
        if self
            .descriptors
            .get_descriptor(format_descriptor_id)
            .await?
            .is_none()
        {
            return Err(AppError::NotFound {
                entity: "format descriptor",
                id: format_descriptor_id,
            });
        }

        let source_hash = compute_hash(&bytes);
        let key = format!("uploads/{}/{}", Uuid::new_v4(), upload_name(file_name));
        let size = bytes.len();
        let source_file = self.blobs.put(&key, bytes).await?;

        let job = self
            .jobs
            .create_job(CreateBulkJobRequest::new(
                source_file,
                source_hash,
                format_descriptor_id,
            ))
            .await?;
        tracing::info!(job_id = %job.id, source = %job.source_file, %size, "Submitted bulk job");
        Ok(job)
    }

    pub async fn job(&self, job_id: Uuid) -> Result<BulkJob, AppError> {
        self.jobs.get_job(job_id).await?.ok_or(AppError::NotFound {
            entity: "job",
            id: job_id,
        })
    }

    pub async fn list(
        &self,
        status: Option<JobStatus>,
        limit: usize,
    ) -> Result<Vec<BulkJob>, AppError> {
        self.jobs.list_jobs(status, limit).await
    }

    /// Move a `new` job to `processing` and hand it to the worker.
    ///
    /// Completed and already-running jobs are reported, not rejected.
    pub async fn request_processing(&self, job_id: Uuid) -> Result<StartDecision, AppError> {
        let job = self.job(job_id).await?;
        let decision = job.check_start()?;
        if decision != StartDecision::Begin {
            tracing::info!(%job_id, ?decision, "Start request needs no action");
            return Ok(decision);
        }

        if !self.jobs.mark_processing(job_id).await? {
            // Someone else moved it first; report what they did.
            return self.job(job_id).await?.check_start();
        }
        self.publish(TOPIC_START, job_id).await?;
        Ok(StartDecision::Begin)
    }

    /// Ask the worker to stop a `processing` job.
    pub async fn request_stop(&self, job_id: Uuid) -> Result<(), AppError> {
        self.job(job_id).await?.check_stop()?;
        self.publish(TOPIC_STOP, job_id).await
    }

    /// Remove every punch the job wrote. Returns how many were removed.
    pub async fn rollback(&self, job_id: Uuid) -> Result<u64, AppError> {
        let now = Utc::now();
        self.job(job_id).await?.check_rollback(now)?;
        let removed = self.jobs.rollback(job_id, now).await?;
        tracing::info!(%job_id, %removed, "Rolled back bulk job");
        Ok(removed)
    }

    pub async fn delete(&self, job_id: Uuid) -> Result<(), AppError> {
        self.job(job_id).await?.check_delete()?;
        self.jobs.soft_delete(job_id).await?;
        tracing::info!(%job_id, "Deleted bulk job");
        Ok(())
    }

    async fn publish(&self, topic: &str, job_id: Uuid) -> Result<(), AppError> {
        let payload = serde_json::to_value(JobMessage { job_id })?;
        let message_id = self.queue.enqueue(topic, payload).await?;
        tracing::debug!(%job_id, %topic, %message_id, "Published job message");
        Ok(())
    }
}

/// Keep only the final path component of a client-supplied name.
fn upload_name(file_name: &str) -> String {
    let name = file_name
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or_default()
        .trim();
    match name {
        "" | "." | ".." => "upload".to_string(),
        name => name.to_string(),
    }
}
