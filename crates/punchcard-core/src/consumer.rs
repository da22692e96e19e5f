use tokio_util::sync::CancellationToken;

use crate::config::ConsumerConfig;
use crate::error::AppError;
use crate::queue::{QueueGateway, QueueMessage, TOPIC_START, TOPIC_STOP};
use crate::traits::JobRunner;
use crate::worker::{WorkerEvent, WorkerReporter};

const TOPICS: &[&str] = &[TOPIC_START, TOPIC_STOP];

/// Polls the durable queue and turns start/stop messages into worker commands.
pub struct QueueConsumer<Q, R>
where
    Q: QueueGateway,
    R: JobRunner,
{
    queue: Q,
    runner: R,
    config: ConsumerConfig,
}

impl<Q, R> QueueConsumer<Q, R>
where
    Q: QueueGateway,
    R: JobRunner,
{
    pub fn new(queue: Q, runner: R, config: ConsumerConfig) -> Self {
        Self {
            queue,
            runner,
            config,
        }
    }

    /// Run the consumer loop until cancellation.
    pub async fn run<WR: WorkerReporter>(
        &self,
        cancel_token: CancellationToken,
        reporter: &WR,
    ) -> Result<(), AppError> {
        reporter.report(WorkerEvent::ConsumerStarted {
            consumer_id: &self.config.consumer_id,
        });

        loop {
            if cancel_token.is_cancelled() {
                break;
            }

            reporter.report(WorkerEvent::Polling);

            match self.queue.claim(&self.config.consumer_id, TOPICS).await {
                Ok(Some(message)) => {
                    reporter.report(WorkerEvent::MessageClaimed { message: &message });
                    if let Err(e) = self.dispatch(&message).await {
                        let error = e.to_string();
                        reporter.report(WorkerEvent::MessageFailed {
                            message_id: message.id,
                            error: &error,
                        });
                    }
                    // Failed messages are acknowledged too; nothing retries them.
                    if let Err(e) = self.queue.ack(message.id).await {
                        tracing::error!(message_id = message.id, error = %e, "Failed to ack message");
                    }
                }
                Ok(None) => {
                    tokio::select! {
                        () = tokio::time::sleep(self.config.poll_interval) => {}
                        () = cancel_token.cancelled() => break,
                    }
                }
                Err(e) => {
                    tracing::error!(error = %e, "Failed to claim message");
                    tokio::select! {
                        () = tokio::time::sleep(self.config.poll_interval * 2) => {}
                        () = cancel_token.cancelled() => break,
                    }
                }
            }
        }

        // Graceful shutdown: hand back anything claimed but not acknowledged
        let released = self
            .queue
            .release_consumer(&self.config.consumer_id)
            .await
            .unwrap_or(0);

        reporter.report(WorkerEvent::ShuttingDown {
            consumer_id: &self.config.consumer_id,
            messages_released: released,
        });
        reporter.report(WorkerEvent::Stopped {
            consumer_id: &self.config.consumer_id,
        });

        Ok(())
    }

    async fn dispatch(&self, message: &QueueMessage) -> Result<(), AppError> {
        let job_id = message.job_message()?.job_id;
        match message.topic.as_str() {
            TOPIC_START => {
                let outcome = self.runner.request_processing(job_id);
                tracing::debug!(%job_id, ?outcome, "Start request handled");
            }
            TOPIC_STOP => {
                let outcome = self.runner.request_stop(job_id).await?;
                tracing::debug!(%job_id, ?outcome, "Stop request handled");
            }
            other => {
                return Err(AppError::QueueError(format!("Unexpected topic '{other}'")));
            }
        }
        Ok(())
    }
}
