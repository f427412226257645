//! Postgres-backed stores and the database queue.
//!
//! These run against a real Postgres container and are ignored by default.

mod common;

use std::time::Duration;

use chrono::{Duration as ChronoDuration, Utc};
use discovery_core::common::{DiscoveryJobId, UserId};
use discovery_core::domains::creators::CreatorProfile;
use discovery_core::domains::credentials::Credential;
use discovery_core::domains::discovery::models::{NewDiscoveryJob, QueueLink};
use discovery_core::domains::discovery::{DiscoveryJob, DiscoveryPayload, DiscoveryStatus};
use discovery_core::domains::sync::{UserProfile, VideoRecord, VideoUpsert};
use discovery_core::kernel::jobs::{BaseDiscoveryQueue, Delivery, DiscoveryMessage, PostgresDiscoveryQueue, RetryPolicy};
use test_context::test_context;
use uuid::Uuid;

use crate::common::{scraped, user_info, video, TestHarness};

const LEASE: Duration = Duration::from_secs(60);

fn unique(prefix: &str) -> String {
    format!("{}{}", prefix, &Uuid::new_v4().simple().to_string()[..8])
}

fn payload(hashtag: &str) -> DiscoveryPayload {
    DiscoveryPayload {
        hashtag: hashtag.to_string(),
        limit: 5,
        ..Default::default()
    }
}

#[test_context(TestHarness)]
#[tokio::test]
#[ignore = "requires docker"]
async fn discovery_record_lifecycle(ctx: &mut TestHarness) {
    let pool = &ctx.db_pool;
    let hashtag = unique("tag");

    let job = DiscoveryJob::insert(
        &NewDiscoveryJob::builder()
            .identifier(hashtag.clone())
            .source(format!("hashtag:{}", hashtag))
            .payload(payload(&hashtag))
            .build(),
        pool,
    )
    .await
    .unwrap();
    assert_eq!(job.status, DiscoveryStatus::Pending);
    assert_eq!(job.attempts, 0);

    let processing = DiscoveryJob::mark_processing(job.id, LEASE, pool).await.unwrap().unwrap();
    assert_eq!(processing.status, DiscoveryStatus::Processing);
    assert_eq!(processing.attempts, 1);
    assert!(processing.payload.0.processing_started_at.is_some());
    assert!(DiscoveryJob::mark_processing(job.id, LEASE, pool).await.unwrap().is_none());

    // A held record keeps its status when re-armed.
    let mut next = payload(&hashtag);
    next.requested_by = Some("ops".into());
    let rearmed = DiscoveryJob::rearm(job.id, &next, pool).await.unwrap().unwrap();
    assert_eq!(rearmed.status, DiscoveryStatus::Processing);
    assert_eq!(rearmed.payload.0.requested_by.as_deref(), Some("ops"));

    let mut done = next.clone();
    done.success_count = Some(2);
    assert!(DiscoveryJob::finish(job.id, DiscoveryStatus::Completed, &done, pool).await.unwrap());
    assert!(!DiscoveryJob::finish(job.id, DiscoveryStatus::Failed, &done, pool).await.unwrap());

    let stored = DiscoveryJob::find_by_id(job.id, pool).await.unwrap().unwrap();
    assert_eq!(stored.status, DiscoveryStatus::Completed);
    assert_eq!(stored.payload.0.success_count, Some(2));

    // A finished record starts a new run; the counter keeps counting.
    let rearmed = DiscoveryJob::rearm(job.id, &next, pool).await.unwrap().unwrap();
    assert_eq!(rearmed.status, DiscoveryStatus::Pending);
    assert_eq!(rearmed.attempts, 1);
    assert_eq!(rearmed.attempt_base, 1);

    assert!(DiscoveryJob::claim_next_pending(0, LEASE, pool)
        .await
        .unwrap()
        .map_or(true, |claimed| claimed.id != job.id));

    let claimed = claim_ours(job.id, pool).await.unwrap();
    assert_eq!(claimed.status, DiscoveryStatus::Processing);
    assert_eq!(claimed.attempts, 2);
    assert_eq!(claimed.run_attempts(), 1);

    assert!(DiscoveryJob::find_by_id(DiscoveryJobId::new(), pool).await.unwrap().is_none());
}

async fn claim_ours(id: DiscoveryJobId, pool: &sqlx::PgPool) -> Option<DiscoveryJob> {
    while let Some(candidate) = DiscoveryJob::claim_next_pending(3, LEASE, pool).await.unwrap() {
        if candidate.id == id {
            return Some(candidate);
        }
    }
    None
}

async fn expire_record_lease(id: DiscoveryJobId, pool: &sqlx::PgPool) {
    sqlx::query("UPDATE creator_discoveries SET lease_expires_at = NOW() - INTERVAL '1 second' WHERE id = $1")
        .bind(id)
        .execute(pool)
        .await
        .unwrap();
}

#[test_context(TestHarness)]
#[tokio::test]
#[ignore = "requires docker"]
async fn stale_processing_record_is_taken_over(ctx: &mut TestHarness) {
    let pool = &ctx.db_pool;
    let hashtag = unique("tag");
    let job = DiscoveryJob::insert(
        &NewDiscoveryJob::builder()
            .identifier(hashtag.clone())
            .source(format!("hashtag:{}", hashtag))
            .payload(payload(&hashtag))
            .build(),
        pool,
    )
    .await
    .unwrap();

    DiscoveryJob::mark_processing(job.id, LEASE, pool).await.unwrap().unwrap();

    // A live lease keeps other workers out, and a heartbeat pushes it forward.
    assert!(DiscoveryJob::mark_processing(job.id, LEASE, pool).await.unwrap().is_none());
    expire_record_lease(job.id, pool).await;
    DiscoveryJob::extend_lease(job.id, LEASE, pool).await.unwrap();
    assert!(DiscoveryJob::mark_processing(job.id, LEASE, pool).await.unwrap().is_none());

    // Once the holder stops renewing, the record can be taken by id or by polling.
    expire_record_lease(job.id, pool).await;
    let taken = DiscoveryJob::mark_processing(job.id, LEASE, pool).await.unwrap().unwrap();
    assert_eq!(taken.status, DiscoveryStatus::Processing);
    assert_eq!(taken.attempts, 2);

    expire_record_lease(job.id, pool).await;
    let polled = claim_ours(job.id, pool).await.unwrap();
    assert_eq!(polled.attempts, 3);
}

#[test_context(TestHarness)]
#[tokio::test]
#[ignore = "requires docker"]
async fn queue_link_merges_into_current_payload(ctx: &mut TestHarness) {
    let pool = &ctx.db_pool;
    let hashtag = unique("tag");
    let mut initial = payload(&hashtag);
    initial
        .extra
        .insert("legacyField".into(), serde_json::json!({ "kept": true }));
    initial.success_count = Some(3);
    initial.push_error("boom", Utc::now());

    let job = DiscoveryJob::insert(
        &NewDiscoveryJob::builder()
            .identifier(hashtag.clone())
            .source(format!("hashtag:{}", hashtag))
            .payload(initial)
            .build(),
        pool,
    )
    .await
    .unwrap();

    let link = QueueLink {
        job_id: "queue-1".into(),
        enqueued_at: Utc::now(),
    };
    DiscoveryJob::link_queue(job.id, &link, pool).await.unwrap();

    let stored = DiscoveryJob::find_by_id(job.id, pool).await.unwrap().unwrap();
    assert_eq!(stored.payload.0.queue.as_ref().map(|q| q.job_id.as_str()), Some("queue-1"));
    assert_eq!(stored.payload.0.success_count, Some(3));
    assert_eq!(stored.payload.0.errors.len(), 1);
    assert_eq!(stored.payload.0.extra["legacyField"]["kept"], true);
}

#[test_context(TestHarness)]
#[tokio::test]
#[ignore = "requires docker"]
async fn creators_are_unique_by_handle_ignoring_case(ctx: &mut TestHarness) {
    let pool = &ctx.db_pool;
    let handle = unique("Creator");

    assert!(!CreatorProfile::exists_by_handle(&handle, pool).await.unwrap());

    let first = CreatorProfile::upsert(&scraped(&handle, 100), "hashtag:cats", pool)
        .await
        .unwrap();
    assert_eq!(first.platform_id, CreatorProfile::platform_id_for(&handle));
    assert!(CreatorProfile::exists_by_handle(&handle.to_uppercase(), pool).await.unwrap());

    let second = CreatorProfile::upsert(&scraped(&handle.to_lowercase(), 250), "hashtag:dogs", pool)
        .await
        .unwrap();
    assert_eq!(second.id, first.id);
    assert_eq!(second.username, handle);
    assert_eq!(second.follower_count, 250);
    assert_eq!(second.profile_data.0["source"], "hashtag:dogs");
}

#[test_context(TestHarness)]
#[tokio::test]
#[ignore = "requires docker"]
async fn tokens_profile_and_videos_round_trip(ctx: &mut TestHarness) {
    let pool = &ctx.db_pool;
    let user_id = UserId::new();
    let expires = Utc::now() + ChronoDuration::hours(1);

    Credential::store_tokens(user_id, "enc-access", Some("enc-refresh"), Some(expires), pool)
        .await
        .unwrap();
    Credential::store_tokens(user_id, "enc-access-2", None, None, pool)
        .await
        .unwrap();

    let credential = Credential::find_by_user(user_id, pool).await.unwrap().unwrap();
    assert_eq!(credential.access_token_encrypted.as_deref(), Some("enc-access-2"));
    assert_eq!(credential.refresh_token_encrypted.as_deref(), Some("enc-refresh"));
    assert!(credential.token_expires_at.is_none());

    UserProfile::update_from_info(user_id, &user_info("alice"), pool)
        .await
        .unwrap();

    let platform_id = unique("v");
    VideoRecord::upsert(user_id, &VideoUpsert::from(&video(&platform_id, 200, 10)), pool)
        .await
        .unwrap();
    VideoRecord::upsert(user_id, &VideoUpsert::from(&video(&platform_id, 400, 10)), pool)
        .await
        .unwrap();

    let rows = VideoRecord::find_by_user(user_id, pool).await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].view_count, 400);
    assert_eq!(rows[0].engagement_rate, "2.50");
}

async fn reserve_ours(queue: &PostgresDiscoveryQueue, job_id: &str) -> Option<Delivery> {
    queue
        .reserve("worker-test", 100)
        .await
        .unwrap()
        .into_iter()
        .find(|d| d.job_id == job_id)
}

#[test_context(TestHarness)]
#[tokio::test]
#[ignore = "requires docker"]
async fn queue_redelivers_until_attempts_run_out(ctx: &mut TestHarness) {
    let queue = PostgresDiscoveryQueue::new(
        ctx.db_pool.clone(),
        RetryPolicy {
            max_attempts: 2,
            backoff_base: Duration::ZERO,
        },
    );
    let message = DiscoveryMessage {
        discovery_id: DiscoveryJobId::new(),
        hashtag: "cats".into(),
        limit: 5,
        source: "hashtag:cats".into(),
        requested_by: None,
        metadata: None,
    };
    let job_id = queue.add(&message).await.unwrap();

    let first = reserve_ours(&queue, &job_id).await.unwrap();
    assert_eq!(first.attempt, 1);
    assert_eq!(first.message, message);
    queue.fail(&first, "boom", true).await.unwrap();

    let second = reserve_ours(&queue, &job_id).await.unwrap();
    assert_eq!(second.attempt, 2);
    queue.fail(&second, "boom again", true).await.unwrap();

    assert!(reserve_ours(&queue, &job_id).await.is_none());

    let (status, last_error): (String, Option<String>) =
        sqlx::query_as("SELECT status, last_error FROM discovery_queue WHERE id = $1::uuid")
            .bind(&job_id)
            .fetch_one(&ctx.db_pool)
            .await
            .unwrap();
    assert_eq!(status, "failed");
    assert_eq!(last_error.as_deref(), Some("boom again"));
}

async fn expire_queue_lease(job_id: &str, pool: &sqlx::PgPool) {
    sqlx::query("UPDATE discovery_queue SET lease_expires_at = NOW() - INTERVAL '1 second' WHERE id = $1::uuid")
        .bind(job_id)
        .execute(pool)
        .await
        .unwrap();
}

#[test_context(TestHarness)]
#[tokio::test]
#[ignore = "requires docker"]
async fn queue_reclaims_deliveries_with_expired_leases(ctx: &mut TestHarness) {
    let queue = PostgresDiscoveryQueue::new(
        ctx.db_pool.clone(),
        RetryPolicy {
            max_attempts: 3,
            backoff_base: Duration::ZERO,
        },
    )
    .with_lease(LEASE);
    let message = DiscoveryMessage {
        discovery_id: DiscoveryJobId::new(),
        hashtag: "dogs".into(),
        limit: 5,
        source: "hashtag:dogs".into(),
        requested_by: None,
        metadata: None,
    };
    let job_id = queue.add(&message).await.unwrap();

    let first = reserve_ours(&queue, &job_id).await.unwrap();
    assert!(reserve_ours(&queue, &job_id).await.is_none());

    expire_queue_lease(&job_id, &ctx.db_pool).await;
    queue.heartbeat(&first).await.unwrap();
    assert!(reserve_ours(&queue, &job_id).await.is_none());

    expire_queue_lease(&job_id, &ctx.db_pool).await;
    let second = reserve_ours(&queue, &job_id).await.unwrap();
    assert_eq!(second.attempt, 2);
    assert_eq!(second.message, message);
    queue.complete(&second).await.unwrap();
    assert!(reserve_ours(&queue, &job_id).await.is_none());
}
