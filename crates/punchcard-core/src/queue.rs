//! Durable dispatch between the job controller and the ingestion worker.
//!
//! Every start or stop request becomes one message on the durable queue.
//! The worker process consumes them one at a time; the in-memory FIFO of the
//! worker sits on top of that.

use std::future::Future;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::AppError;
use crate::traits::IdleListener;

pub const TOPIC_START: &str = "attendance.bulk.start";
pub const TOPIC_STOP: &str = "attendance.bulk.stop";
pub const TOPIC_REPORT: &str = "attendance.report.regenerate";

/// Payload of start and stop messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobMessage {
    pub job_id: Uuid,
}

/// A claimed message.
#[derive(Debug, Clone)]
pub struct QueueMessage {
    pub id: i64,
    pub topic: String,
    pub payload: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

impl QueueMessage {
    pub fn job_message(&self) -> Result<JobMessage, AppError> {
        Ok(serde_json::from_value(self.payload.clone())?)
    }
}

/// At-least-once durable queue.
pub trait QueueGateway: Send + Sync + Clone {
    fn enqueue(
        &self,
        topic: &str,
        payload: serde_json::Value,
    ) -> impl Future<Output = Result<i64, AppError>> + Send;

    /// Atomically claim the oldest pending message on any of `topics`.
    fn claim(
        &self,
        consumer_id: &str,
        topics: &[&str],
    ) -> impl Future<Output = Result<Option<QueueMessage>, AppError>> + Send;

    fn ack(&self, message_id: i64) -> impl Future<Output = Result<(), AppError>> + Send;

    /// Return all messages held by a consumer to the pending state.
    fn release_consumer(
        &self,
        consumer_id: &str,
    ) -> impl Future<Output = Result<u64, AppError>> + Send;
}

/// Idle listener that asks the reporting job to regenerate its reports.
#[derive(Clone)]
pub struct QueueIdleListener<Q: QueueGateway> {
    queue: Q,
}

impl<Q: QueueGateway> QueueIdleListener<Q> {
    pub fn new(queue: Q) -> Self {
        Self { queue }
    }
}

impl<Q: QueueGateway> IdleListener for QueueIdleListener<Q> {
    async fn on_worker_idle(&self) {
        let payload = serde_json::json!({ "requested_at": Utc::now() });
        if let Err(e) = self.queue.enqueue(TOPIC_REPORT, payload).await {
            tracing::error!(error = %e, "Failed to request report regeneration");
        }
    }
}
