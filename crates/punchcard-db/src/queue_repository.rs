use chrono::{DateTime, Utc};
use sqlx::PgPool;

use punchcard_core::error::AppError;
use punchcard_core::queue::{QueueGateway, QueueMessage};

/// Durable queue on a PostgreSQL table, claimed with `SELECT FOR UPDATE SKIP LOCKED`.
#[derive(Clone)]
pub struct QueueRepository {
    pool: PgPool,
}

impl QueueRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Messages not yet claimed, per topic.
    pub async fn pending_by_topic(&self) -> Result<Vec<(String, i64)>, AppError> {
        sqlx::query_as(
            r#"
            SELECT topic, COUNT(*) FROM queue_messages
            WHERE status = 'pending'
            GROUP BY topic
            ORDER BY topic
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::QueueError(e.to_string()))
    }
}

// -- Internal row type for sqlx deserialization --

#[derive(sqlx::FromRow)]
struct QueueMessageRow {
    id: i64,
    topic: String,
    payload: serde_json::Value,
    created_at: DateTime<Utc>,
}

impl From<QueueMessageRow> for QueueMessage {
    fn from(row: QueueMessageRow) -> Self {
        QueueMessage {
            id: row.id,
            topic: row.topic,
            payload: row.payload,
            created_at: row.created_at,
        }
    }
}

impl QueueGateway for QueueRepository {
    async fn enqueue(&self, topic: &str, payload: serde_json::Value) -> Result<i64, AppError> {
        let (id,): (i64,) = sqlx::query_as(
            r#"INSERT INTO queue_messages (topic, payload) VALUES ($1, $2) RETURNING id"#,
        )
        .bind(topic)
        .bind(&payload)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| AppError::QueueError(e.to_string()))?;

        Ok(id)
    }

    async fn claim(
        &self,
        consumer_id: &str,
        topics: &[&str],
    ) -> Result<Option<QueueMessage>, AppError> {
        let topics: Vec<String> = topics.iter().map(|t| t.to_string()).collect();
        let row = sqlx::query_as::<_, QueueMessageRow>(
            r#"
            UPDATE queue_messages
            SET status = 'claimed', consumer_id = $1, claimed_at = NOW()
            WHERE id = (
                SELECT id FROM queue_messages
                WHERE status = 'pending' AND topic = ANY($2)
                ORDER BY id ASC
                FOR UPDATE SKIP LOCKED
                LIMIT 1
            )
            RETURNING id, topic, payload, created_at
            "#,
        )
        .bind(consumer_id)
        .bind(&topics)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::QueueError(e.to_string()))?;

        Ok(row.map(Into::into))
    }

    async fn ack(&self, message_id: i64) -> Result<(), AppError> {
        sqlx::query(
            r#"
            UPDATE queue_messages
            SET status = 'done', acked_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(message_id)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::QueueError(e.to_string()))?;

        Ok(())
    }

    async fn release_consumer(&self, consumer_id: &str) -> Result<u64, AppError> {
        let result = sqlx::query(
            r#"
            UPDATE queue_messages
            SET status = 'pending', consumer_id = NULL, claimed_at = NULL
            WHERE consumer_id = $1 AND status = 'claimed'
            "#,
        )
        .bind(consumer_id)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::QueueError(e.to_string()))?;

        Ok(result.rows_affected())
    }
}
