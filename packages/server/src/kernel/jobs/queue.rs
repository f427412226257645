//! PostgreSQL-backed discovery queue.
//!
//! Messages live in `discovery_queue`. Workers reserve them with
//! `FOR UPDATE SKIP LOCKED` and hold a lease they renew while working; an
//! `active` row whose lease ran out belonged to a dead worker and is handed
//! out again. A failed delivery either goes back to `waiting` with
//! exponential backoff or ends in `failed`. Finished rows are retained.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use bytes::Bytes;
use sqlx::types::Json;
use sqlx::{FromRow, PgPool};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::message::DiscoveryMessage;
use crate::kernel::nats::{NatsPublisher, DISCOVERY_ENQUEUED_SUBJECT};

/// Attempt budget and backoff for queue deliveries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: i32,
    pub backoff_base: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_base: Duration::from_secs(60),
        }
    }
}

impl RetryPolicy {
    /// Delay before redelivering after failed attempt number `attempt` (1-based).
    pub fn delay_for(&self, attempt: i32) -> Duration {
        let exp = attempt.saturating_sub(1).clamp(0, 20) as u32;
        self.backoff_base.saturating_mul(2u32.saturating_pow(exp))
    }
}

/// A reserved message. `attempt` counts deliveries of this queue entry.
#[derive(Debug, Clone, PartialEq)]
pub struct Delivery {
    pub job_id: String,
    pub message: DiscoveryMessage,
    pub attempt: i32,
}

#[async_trait]
pub trait BaseDiscoveryQueue: Send + Sync {
    /// Submit a message; returns the queue-assigned job id.
    async fn add(&self, message: &DiscoveryMessage) -> Result<String>;

    /// Reserve up to `limit` ready messages for `worker_id`.
    async fn reserve(&self, worker_id: &str, limit: usize) -> Result<Vec<Delivery>>;

    async fn complete(&self, delivery: &Delivery) -> Result<()>;

    /// Back to waiting with backoff when `retry` is set and attempts remain,
    /// otherwise failed for good.
    async fn fail(&self, delivery: &Delivery, error: &str, retry: bool) -> Result<()>;

    /// Extend the lease on a delivery that is still being worked on.
    async fn heartbeat(&self, delivery: &Delivery) -> Result<()>;

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

#[derive(Debug, FromRow)]
struct ReservedRow {
    id: Uuid,
    message: Json<DiscoveryMessage>,
    attempts_made: i32,
}

pub struct PostgresDiscoveryQueue {
    pool: PgPool,
    policy: RetryPolicy,
    lease: Duration,
    nats: Option<Arc<dyn NatsPublisher>>,
}

impl PostgresDiscoveryQueue {
    pub fn new(pool: PgPool, policy: RetryPolicy) -> Self {
        Self {
            pool,
            policy,
            lease: Duration::from_secs(300),
            nats: None,
        }
    }

    pub fn with_lease(mut self, lease: Duration) -> Self {
        self.lease = lease;
        self
    }

    pub fn with_nats(mut self, nats: Arc<dyn NatsPublisher>) -> Self {
        self.nats = Some(nats);
        self
    }

    fn parse_job_id(job_id: &str) -> Result<Uuid> {
        Uuid::parse_str(job_id).with_context(|| format!("invalid queue job id '{}'", job_id))
    }
}

/// Announce a new job on NATS. Failures are logged only.
pub async fn notify_enqueued(nats: Option<&Arc<dyn NatsPublisher>>, job_id: &str, message: &DiscoveryMessage) {
    let Some(nats) = nats else {
        return;
    };
    let body = serde_json::json!({
        "jobId": job_id,
        "discoveryId": message.discovery_id,
        "hashtag": message.hashtag,
    });
    let payload = match serde_json::to_vec(&body) {
        Ok(bytes) => Bytes::from(bytes),
        Err(e) => {
            warn!(error = %e, "Failed to encode enqueue notification");
            return;
        }
    };
    if let Err(e) = nats.publish(DISCOVERY_ENQUEUED_SUBJECT.to_string(), payload).await {
        warn!(job_id = %job_id, error = %e, "Failed to publish enqueue notification");
    }
}

#[async_trait]
impl BaseDiscoveryQueue for PostgresDiscoveryQueue {
    async fn add(&self, message: &DiscoveryMessage) -> Result<String> {
        let id = Uuid::now_v7();
        sqlx::query(
            r#"
            INSERT INTO discovery_queue (id, discovery_id, message, status, max_attempts)
            VALUES ($1, $2, $3, 'waiting', $4)
            "#,
        )
        .bind(id)
        .bind(message.discovery_id)
        .bind(Json(message))
        .bind(self.policy.max_attempts)
        .execute(&self.pool)
        .await
        .context("Failed to insert queue message")?;

        let job_id = id.to_string();
        info!(job_id = %job_id, discovery_id = %message.discovery_id, "Discovery message queued");
        notify_enqueued(self.nats.as_ref(), &job_id, message).await;
        Ok(job_id)
    }

    async fn reserve(&self, worker_id: &str, limit: usize) -> Result<Vec<Delivery>> {
        let rows = sqlx::query_as::<_, ReservedRow>(
            r#"
            WITH ready AS (
                SELECT id FROM discovery_queue
                WHERE (status = 'waiting' AND run_at <= NOW())
                   OR (status = 'active' AND lease_expires_at < NOW())
                ORDER BY run_at ASC, created_at ASC
                LIMIT $2
                FOR UPDATE SKIP LOCKED
            )
            UPDATE discovery_queue q
            SET status = 'active',
                attempts_made = q.attempts_made + 1,
                worker_id = $1,
                lease_expires_at = NOW() + ($3 * INTERVAL '1 millisecond')
            FROM ready
            WHERE q.id = ready.id
            RETURNING q.id, q.message, q.attempts_made
            "#,
        )
        .bind(worker_id)
        .bind(limit as i64)
        .bind(self.lease.as_millis() as f64)
        .fetch_all(&self.pool)
        .await
        .context("Failed to reserve queue messages")?;

        if !rows.is_empty() {
            debug!(worker_id = %worker_id, count = rows.len(), "Reserved queue messages");
        }

        Ok(rows
            .into_iter()
            .map(|row| Delivery {
                job_id: row.id.to_string(),
                message: row.message.0,
                attempt: row.attempts_made,
            })
            .collect())
    }

    async fn complete(&self, delivery: &Delivery) -> Result<()> {
        let id = Self::parse_job_id(&delivery.job_id)?;
        sqlx::query(
            r#"
            UPDATE discovery_queue
            SET status = 'completed', finished_at = NOW(), worker_id = NULL, lease_expires_at = NULL
            WHERE id = $1
            "#,
        )
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn fail(&self, delivery: &Delivery, error: &str, retry: bool) -> Result<()> {
        let id = Self::parse_job_id(&delivery.job_id)?;
        let delay_ms = self.policy.delay_for(delivery.attempt).as_millis() as f64;

        sqlx::query(
            r#"
            UPDATE discovery_queue
            SET status = CASE WHEN $2 AND attempts_made < max_attempts THEN 'waiting' ELSE 'failed' END,
                run_at = CASE WHEN $2 AND attempts_made < max_attempts
                              THEN NOW() + ($3 * INTERVAL '1 millisecond')
                              ELSE run_at END,
                finished_at = CASE WHEN $2 AND attempts_made < max_attempts THEN NULL ELSE NOW() END,
                last_error = $4,
                worker_id = NULL,
                lease_expires_at = NULL
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(retry)
        .bind(delay_ms)
        .bind(error)
        .execute(&self.pool)
        .await?;

        debug!(job_id = %delivery.job_id, attempt = delivery.attempt, retry, delay_ms, "Queue message failed");
        Ok(())
    }

    async fn heartbeat(&self, delivery: &Delivery) -> Result<()> {
        let id = Self::parse_job_id(&delivery.job_id)?;
        sqlx::query(
            r#"
            UPDATE discovery_queue
            SET lease_expires_at = NOW() + ($2 * INTERVAL '1 millisecond')
            WHERE id = $1 AND status = 'active'
            "#,
        )
        .bind(id)
        .bind(self.lease.as_millis() as f64)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
