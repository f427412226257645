use std::time::Duration;

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::types::Json;
use sqlx::{FromRow, PgPool};
use typed_builder::TypedBuilder;

use crate::common::DiscoveryJobId;

// ============================================================================
// Status
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type, Default)]
#[sqlx(type_name = "text", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum DiscoveryStatus {
    #[default]
    Pending,
    Processing,
    Completed,
    Failed,
}

impl DiscoveryStatus {
    /// Allowed moves: pending -> processing -> {completed, pending, failed}.
    /// Re-enqueueing a finished record starts a new run (completed/failed ->
    /// pending), and a processing record whose lease expired is taken over
    /// by another worker (processing -> processing).
    pub fn can_transition_to(self, next: DiscoveryStatus) -> bool {
        use DiscoveryStatus::*;
        matches!(
            (self, next),
            (Pending, Processing)
                | (Processing, Processing)
                | (Processing, Completed)
                | (Processing, Pending)
                | (Processing, Failed)
                | (Completed, Pending)
                | (Failed, Pending)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, DiscoveryStatus::Completed | DiscoveryStatus::Failed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            DiscoveryStatus::Pending => "pending",
            DiscoveryStatus::Processing => "processing",
            DiscoveryStatus::Completed => "completed",
            DiscoveryStatus::Failed => "failed",
        }
    }
}

impl std::fmt::Display for DiscoveryStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Payload
// ============================================================================

/// Link between a discovery record and the queue message delivering it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueLink {
    pub job_id: String,
    pub enqueued_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PayloadError {
    pub message: String,
    pub at: DateTime<Utc>,
}

/// JSON snapshot stored alongside a discovery record.
///
/// `errors` is append-only. Keys this struct doesn't know about are kept in
/// `extra` so older writers' fields survive a read-modify-write.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DiscoveryPayload {
    pub hashtag: String,
    pub limit: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub requested_by: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub queue: Option<QueueLink>,
    pub errors: Vec<PayloadError>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub success_count: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skip_count: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_processed: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub will_retry: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub processing_started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_updated_at: Option<DateTime<Utc>>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl DiscoveryPayload {
    pub fn push_error(&mut self, message: impl Into<String>, at: DateTime<Utc>) {
        self.errors.push(PayloadError {
            message: message.into(),
            at,
        });
    }
}

/// Outcome counters written when a batch completes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletionStats {
    pub success_count: i64,
    pub skip_count: i64,
    pub total_processed: i64,
}

// ============================================================================
// Record
// ============================================================================

#[derive(Debug, Clone, FromRow, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscoveryJob {
    pub id: DiscoveryJobId,
    pub identifier: String,
    pub source: String,
    pub status: DiscoveryStatus,
    /// Every attempt ever made. Never reset.
    pub attempts: i32,
    /// `attempts` when the current run started; a re-armed finished record
    /// gets a fresh budget without rewinding the counter.
    pub attempt_base: i32,
    pub last_attempt_at: Option<DateTime<Utc>>,
    pub payload: Json<DiscoveryPayload>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, TypedBuilder)]
pub struct NewDiscoveryJob {
    #[builder(default = DiscoveryJobId::new())]
    pub id: DiscoveryJobId,
    #[builder(setter(into))]
    pub identifier: String,
    #[builder(setter(into))]
    pub source: String,
    pub payload: DiscoveryPayload,
}

const COLUMNS: &str =
    "id, identifier, source, status, attempts, attempt_base, last_attempt_at, payload, created_at, updated_at";

// =============================================================================
// SQL Queries
// =============================================================================

impl DiscoveryJob {
    /// Attempts made in the current run.
    pub fn run_attempts(&self) -> i32 {
        self.attempts - self.attempt_base
    }

    pub async fn insert(new: &NewDiscoveryJob, pool: &PgPool) -> Result<Self> {
        let q = format!(
            "INSERT INTO creator_discoveries (id, identifier, source, status, attempts, payload)
             VALUES ($1, $2, $3, 'pending', 0, $4)
             RETURNING {}",
            COLUMNS
        );
        sqlx::query_as::<_, Self>(&q)
            .bind(new.id)
            .bind(&new.identifier)
            .bind(&new.source)
            .bind(Json(&new.payload))
            .fetch_one(pool)
            .await
            .map_err(Into::into)
    }

    pub async fn find_by_id(id: DiscoveryJobId, pool: &PgPool) -> Result<Option<Self>> {
        let q = format!("SELECT {} FROM creator_discoveries WHERE id = $1", COLUMNS);
        sqlx::query_as::<_, Self>(&q)
            .bind(id)
            .fetch_optional(pool)
            .await
            .map_err(Into::into)
    }

    /// Write the queue link into the stored payload, leaving every other key
    /// as it is. A worker may already have written results by now.
    pub async fn link_queue(id: DiscoveryJobId, link: &QueueLink, pool: &PgPool) -> Result<()> {
        sqlx::query(
            "UPDATE creator_discoveries
             SET payload = jsonb_set(payload, '{queue}', $2), updated_at = NOW()
             WHERE id = $1",
        )
        .bind(id)
        .bind(Json(link))
        .execute(pool)
        .await?;
        Ok(())
    }

    /// Replace the payload and put the record back to `pending` unless a
    /// worker currently holds it. A completed or failed record starts a new
    /// run: its attempt budget is counted from the current `attempts`.
    pub async fn rearm(id: DiscoveryJobId, payload: &DiscoveryPayload, pool: &PgPool) -> Result<Option<Self>> {
        let q = format!(
            "UPDATE creator_discoveries
             SET payload = $2,
                 status = CASE WHEN status = 'processing' THEN status ELSE 'pending' END,
                 attempt_base = CASE WHEN status IN ('completed', 'failed') THEN attempts ELSE attempt_base END,
                 updated_at = NOW()
             WHERE id = $1
             RETURNING {}",
            COLUMNS
        );
        sqlx::query_as::<_, Self>(&q)
            .bind(id)
            .bind(Json(payload))
            .fetch_optional(pool)
            .await
            .map_err(Into::into)
    }

    /// Take one specific record: pending, or processing under an expired
    /// lease. Returns `None` otherwise.
    pub async fn mark_processing(id: DiscoveryJobId, lease: Duration, pool: &PgPool) -> Result<Option<Self>> {
        let q = format!(
            "UPDATE creator_discoveries
             SET status = 'processing',
                 attempts = attempts + 1,
                 last_attempt_at = NOW(),
                 lease_expires_at = NOW() + ($2 * INTERVAL '1 millisecond'),
                 updated_at = NOW(),
                 payload = jsonb_set(payload, '{{processingStartedAt}}', to_jsonb(NOW()))
             WHERE id = $1
               AND (status = 'pending' OR (status = 'processing' AND lease_expires_at < NOW()))
             RETURNING {}",
            COLUMNS
        );
        sqlx::query_as::<_, Self>(&q)
            .bind(id)
            .bind(lease.as_millis() as f64)
            .fetch_optional(pool)
            .await
            .map_err(Into::into)
    }

    /// Atomically claim the oldest pending record whose run still has attempts
    /// left, or a processing record whose lease ran out.
    ///
    /// Uses `FOR UPDATE SKIP LOCKED` so concurrent pollers never claim the same row.
    pub async fn claim_next_pending(max_attempts: i32, lease: Duration, pool: &PgPool) -> Result<Option<Self>> {
        let q = format!(
            "WITH next_job AS (
                 SELECT id FROM creator_discoveries
                 WHERE (status = 'pending' AND attempts - attempt_base < $1)
                    OR (status = 'processing' AND lease_expires_at < NOW())
                 ORDER BY created_at ASC
                 LIMIT 1
                 FOR UPDATE SKIP LOCKED
             )
             UPDATE creator_discoveries d
             SET status = 'processing',
                 attempts = d.attempts + 1,
                 last_attempt_at = NOW(),
                 lease_expires_at = NOW() + ($2 * INTERVAL '1 millisecond'),
                 updated_at = NOW(),
                 payload = jsonb_set(d.payload, '{{processingStartedAt}}', to_jsonb(NOW()))
             FROM next_job
             WHERE d.id = next_job.id
             RETURNING {}",
            COLUMNS
                .split(", ")
                .map(|c| format!("d.{}", c))
                .collect::<Vec<_>>()
                .join(", ")
        );
        sqlx::query_as::<_, Self>(&q)
            .bind(max_attempts)
            .bind(lease.as_millis() as f64)
            .fetch_optional(pool)
            .await
            .map_err(Into::into)
    }

    /// Heartbeat for a record this worker is processing.
    pub async fn extend_lease(id: DiscoveryJobId, lease: Duration, pool: &PgPool) -> Result<()> {
        sqlx::query(
            "UPDATE creator_discoveries
             SET lease_expires_at = NOW() + ($2 * INTERVAL '1 millisecond')
             WHERE id = $1 AND status = 'processing'",
        )
        .bind(id)
        .bind(lease.as_millis() as f64)
        .execute(pool)
        .await?;
        Ok(())
    }

    /// processing -> `status`, writing the final payload. Returns false when
    /// the record was not in `processing`.
    pub async fn finish(
        id: DiscoveryJobId,
        status: DiscoveryStatus,
        payload: &DiscoveryPayload,
        pool: &PgPool,
    ) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE creator_discoveries
             SET status = $2, payload = $3, lease_expires_at = NULL, updated_at = NOW()
             WHERE id = $1 AND status = 'processing'",
        )
        .bind(id)
        .bind(status)
        .bind(Json(payload))
        .execute(pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }
}
