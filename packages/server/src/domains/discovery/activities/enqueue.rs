//! Enqueue a hashtag discovery: create or re-arm the record, then queue it.

use anyhow::anyhow;
use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::common::{DiscoveryJobId, PipelineError};
use crate::domains::discovery::models::{DiscoveryJob, DiscoveryPayload, NewDiscoveryJob, QueueLink};
use crate::domains::scraping::is_valid_hashtag;
use crate::kernel::jobs::DiscoveryMessage;
use crate::kernel::ServerDeps;

/// Largest `limit` a single discovery may ask for.
pub const MAX_DISCOVERY_LIMIT: i32 = 500;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnqueueDiscoveryInput {
    pub hashtag: String,
    #[serde(default)]
    pub limit: Option<i32>,
    #[serde(default)]
    pub discovery_id: Option<DiscoveryJobId>,
    #[serde(default)]
    pub requested_by: Option<String>,
    #[serde(default)]
    pub metadata: Option<serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EnqueueResult {
    pub discovery_id: DiscoveryJobId,
    pub job_id: String,
    pub hashtag: String,
}

/// Trim whitespace and one leading `#`. What remains must be letters,
/// digits or `_`.
pub fn normalize_hashtag(raw: &str) -> Result<String, PipelineError> {
    let trimmed = raw.trim();
    let tag = trimmed.strip_prefix('#').unwrap_or(trimmed).trim();
    if tag.is_empty() {
        return Err(PipelineError::Validation("hashtag is required".to_string()));
    }
    if !is_valid_hashtag(tag) {
        return Err(PipelineError::Validation(format!(
            "hashtag may only contain letters, digits and underscores, got {:?}",
            tag
        )));
    }
    Ok(tag.to_string())
}

pub fn validate_limit(limit: i32) -> Result<i32, PipelineError> {
    if (1..=MAX_DISCOVERY_LIMIT).contains(&limit) {
        Ok(limit)
    } else {
        Err(PipelineError::Validation(format!(
            "limit must be between 1 and {}, got {}",
            MAX_DISCOVERY_LIMIT, limit
        )))
    }
}

/// `discovery-{hashtag}-{unix_millis}-{6 hex}`
pub fn identifier_for(hashtag: &str, now: DateTime<Utc>) -> String {
    let suffix: u32 = rand::rng().random_range(0..0x100_0000);
    format!("discovery-{}-{}-{:06x}", hashtag, now.timestamp_millis(), suffix)
}

pub fn source_for(hashtag: &str) -> String {
    format!("hashtag:{}", hashtag)
}

fn refresh_snapshot(payload: &mut DiscoveryPayload, hashtag: &str, limit: i32, input: &EnqueueDiscoveryInput, now: DateTime<Utc>) {
    payload.hashtag = hashtag.to_string();
    payload.limit = limit;
    payload.requested_by = input.requested_by.clone();
    payload.metadata = input.metadata.clone();
    payload.status_updated_at = Some(now);
}

/// Counters from a finished run do not describe the run about to start.
fn clear_previous_run(payload: &mut DiscoveryPayload) {
    payload.success_count = None;
    payload.skip_count = None;
    payload.total_processed = None;
    payload.completed_at = None;
    payload.failed_at = None;
    payload.will_retry = None;
}

/// Validate, persist the record, and hand a message to the queue.
///
/// With an explicit `discovery_id` the call is idempotent: an existing record
/// gets the new snapshot and goes back to `pending` (unless a worker holds it),
/// a missing one is created under that id. A completed or failed record starts
/// a new run with a fresh attempt budget; its error history is kept.
pub async fn enqueue_discovery(
    input: EnqueueDiscoveryInput,
    deps: &ServerDeps,
) -> Result<EnqueueResult, PipelineError> {
    let hashtag = normalize_hashtag(&input.hashtag)?;
    let limit = validate_limit(input.limit.unwrap_or(deps.discovery.default_limit))?;
    let source = source_for(&hashtag);
    let now = Utc::now();

    let existing = match input.discovery_id {
        Some(id) => deps.discovery_store.find(id).await?,
        None => None,
    };

    let record: DiscoveryJob = match existing {
        Some(existing) => {
            let mut payload = existing.payload.0.clone();
            if existing.status.is_terminal() {
                clear_previous_run(&mut payload);
            }
            refresh_snapshot(&mut payload, &hashtag, limit, &input, now);
            deps.discovery_store
                .rearm(existing.id, &payload)
                .await?
                .ok_or_else(|| PipelineError::Internal(anyhow!("discovery {} disappeared", existing.id)))?
        }
        None => {
            let mut payload = DiscoveryPayload::default();
            refresh_snapshot(&mut payload, &hashtag, limit, &input, now);
            let new = NewDiscoveryJob::builder()
                .id(input.discovery_id.unwrap_or_default())
                .identifier(identifier_for(&hashtag, now))
                .source(source.clone())
                .payload(payload)
                .build();
            deps.discovery_store.create(new).await?
        }
    };

    let message = DiscoveryMessage {
        discovery_id: record.id,
        hashtag: hashtag.clone(),
        limit,
        source,
        requested_by: input.requested_by.clone(),
        metadata: input.metadata.clone(),
    };
    let job_id = deps
        .discovery_queue
        .add(&message)
        .await
        .map_err(|e| PipelineError::Queue(format!("{:#}", e)))?;

    // Only the queue key is written; a worker may already have picked the
    // message up and recorded its outcome in the payload.
    let link = QueueLink {
        job_id: job_id.clone(),
        enqueued_at: Utc::now(),
    };
    deps.discovery_store.link_queue(record.id, &link).await?;

    info!(
        discovery_id = %record.id,
        job_id = %job_id,
        hashtag = %hashtag,
        limit,
        status = %record.status,
        "Discovery enqueued"
    );

    Ok(EnqueueResult {
        discovery_id: record.id,
        job_id,
        hashtag,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hashtag_is_trimmed_and_unprefixed() {
        assert_eq!(normalize_hashtag("  #cats ").unwrap(), "cats");
        assert_eq!(normalize_hashtag("dogs").unwrap(), "dogs");
        assert!(matches!(normalize_hashtag(" # "), Err(PipelineError::Validation(_))));
        assert!(matches!(normalize_hashtag(""), Err(PipelineError::Validation(_))));
    }

    #[test]
    fn hashtag_rejects_path_and_query_characters() {
        for raw in ["cats/../admin", "cats?lang=en", "#cats#dogs", "two words", "cats%2F"] {
            assert!(
                matches!(normalize_hashtag(raw), Err(PipelineError::Validation(_))),
                "{raw:?} should be rejected"
            );
        }
        assert_eq!(normalize_hashtag("#summer_2024").unwrap(), "summer_2024");
        assert_eq!(normalize_hashtag("ねこ").unwrap(), "ねこ");
    }

    #[test]
    fn limit_bounds() {
        assert_eq!(validate_limit(1).unwrap(), 1);
        assert_eq!(validate_limit(500).unwrap(), 500);
        assert!(validate_limit(0).is_err());
        assert!(validate_limit(501).is_err());
    }

    #[test]
    fn identifier_shape() {
        let now = Utc::now();
        let id = identifier_for("cats", now);
        let prefix = format!("discovery-cats-{}-", now.timestamp_millis());
        assert!(id.starts_with(&prefix));
        let suffix = &id[prefix.len()..];
        assert_eq!(suffix.len(), 6);
        assert!(suffix.chars().all(|c| c.is_ascii_hexdigit()));
    }
}
