//! Status transitions of discovery records across retries, failures and
//! shutdown.

mod common;

use std::sync::Arc;
use std::time::Duration;

use discovery_core::config::DiscoveryConfig;
use discovery_core::domains::discovery::{enqueue_discovery, DiscoveryProcessor, DiscoveryStatus, EnqueueDiscoveryInput};
use discovery_core::kernel::jobs::{
    BaseDiscoveryQueue, DiscoveryJobHandler, DiscoveryWorker, JobOutcome, PollStrategy, PushStrategy,
};
use discovery_core::kernel::test_dependencies::{
    InMemoryCreatorStore, MockHashtagDiscoverer, MockProfileScraper, QueueEntryStatus,
};
use tokio::time::Instant;
use discovery_core::kernel::{BaseDiscoveryStore, TestDependencies};
use tokio_util::sync::CancellationToken;

use crate::common::init_tracing;

use DiscoveryStatus::{Completed, Failed, Pending, Processing};

fn input(hashtag: &str, limit: i32) -> EnqueueDiscoveryInput {
    EnqueueDiscoveryInput {
        hashtag: hashtag.to_string(),
        limit: Some(limit),
        discovery_id: None,
        requested_by: None,
        metadata: None,
    }
}

fn push_worker(deps: &TestDependencies) -> DiscoveryWorker {
    let handler: Arc<dyn DiscoveryJobHandler> = Arc::new(DiscoveryProcessor::new(&deps.worker_deps()));
    let queue: Arc<dyn BaseDiscoveryQueue> = deps.discovery_queue.clone();
    DiscoveryWorker::new(Arc::new(PushStrategy::new(queue, handler, "test-worker", 1)))
}

fn handles() -> MockHashtagDiscoverer {
    MockHashtagDiscoverer::new().with_handles(&["alice", "bob", "carol"])
}

#[tokio::test]
async fn failing_batch_retries_then_fails_after_max_attempts() {
    init_tracing();
    let deps = TestDependencies::new().mock_discoverer(handles().failing_times(10));
    let result = enqueue_discovery(input("cats", 3), &deps.server_deps()).await.unwrap();
    let worker = push_worker(&deps);

    for attempt in 1..=2 {
        assert_eq!(worker.process_one().await.unwrap(), 1);
        let job = deps.discovery_store.get(result.discovery_id).unwrap();
        assert_eq!(job.status, Pending, "attempt {}", attempt);
        assert_eq!(job.attempts, attempt);
        assert_eq!(job.payload.0.will_retry, Some(true));
        assert!(job.payload.0.failed_at.is_none());
    }

    assert_eq!(worker.process_one().await.unwrap(), 1);
    let job = deps.discovery_store.get(result.discovery_id).unwrap();
    assert_eq!(job.status, Failed);
    assert_eq!(job.attempts, 3);
    assert_eq!(job.payload.0.will_retry, Some(false));
    assert!(job.payload.0.failed_at.is_some());
    assert_eq!(job.payload.0.errors.len(), 3);
    assert!(job.payload.0.errors[0].message.contains("Anti-bot challenge"));

    // Nothing left to deliver
    assert_eq!(worker.process_one().await.unwrap(), 0);
    let entry = deps.discovery_queue.entry(&result.job_id).unwrap();
    assert_eq!(entry.status, QueueEntryStatus::Failed);
    assert_eq!(entry.attempts_made, 3);

    assert_eq!(
        deps.discovery_store.transitions(result.discovery_id),
        vec![
            (Pending, Processing),
            (Processing, Pending),
            (Pending, Processing),
            (Processing, Pending),
            (Pending, Processing),
            (Processing, Failed),
        ]
    );
}

#[tokio::test]
async fn transient_failure_recovers_on_next_attempt() {
    let deps = TestDependencies::new().mock_discoverer(handles().failing_times(1));
    let result = enqueue_discovery(input("cats", 3), &deps.server_deps()).await.unwrap();
    let worker = push_worker(&deps);

    worker.process_one().await.unwrap();
    worker.process_one().await.unwrap();

    let job = deps.discovery_store.get(result.discovery_id).unwrap();
    assert_eq!(job.status, Completed);
    assert_eq!(job.attempts, 2);
    assert_eq!(job.payload.0.errors.len(), 1);
    assert_eq!(job.payload.0.will_retry, None);
    assert_eq!(job.payload.0.success_count, Some(3));
}

#[tokio::test]
async fn profile_errors_do_not_abort_the_batch() {
    let deps = TestDependencies::new()
        .mock_discoverer(handles())
        .mock_scraper(MockProfileScraper::new().with_failure("bob"));
    let result = enqueue_discovery(input("cats", 3), &deps.server_deps()).await.unwrap();

    push_worker(&deps).process_one().await.unwrap();

    let job = deps.discovery_store.get(result.discovery_id).unwrap();
    assert_eq!(job.status, Completed);
    assert_eq!(job.payload.0.success_count, Some(2));
    assert_eq!(job.payload.0.skip_count, Some(0));
    assert_eq!(job.payload.0.total_processed, Some(3));
    assert!(deps.creator_store.find("bob").is_none());
}

#[tokio::test]
async fn store_outage_during_batch_takes_the_retry_path() {
    let creators = InMemoryCreatorStore::new();
    creators.set_unavailable(true);
    let deps = TestDependencies::new().mock_discoverer(handles()).creators(creators);
    let result = enqueue_discovery(input("cats", 3), &deps.server_deps()).await.unwrap();

    push_worker(&deps).process_one().await.unwrap();

    let job = deps.discovery_store.get(result.discovery_id).unwrap();
    assert_eq!(job.status, Pending);
    assert!(job.payload.0.errors[0].message.contains("creator store unavailable"));

    let entry = deps.discovery_queue.entry(&result.job_id).unwrap();
    assert_eq!(entry.status, QueueEntryStatus::Waiting);
    assert_eq!(entry.last_error.as_deref().map(|e| e.contains("unavailable")), Some(true));
}

#[tokio::test]
async fn shutdown_before_first_handle_interrupts_and_retries() {
    let deps = TestDependencies::new().mock_discoverer(handles());
    let result = enqueue_discovery(input("cats", 3), &deps.server_deps()).await.unwrap();
    let processor = DiscoveryProcessor::new(&deps.worker_deps());

    let cancel = CancellationToken::new();
    cancel.cancel();
    let outcome = processor.process_by_id(result.discovery_id, &cancel).await.unwrap();

    assert!(matches!(outcome, JobOutcome::Failed { retry: true, .. }));
    let job = deps.discovery_store.get(result.discovery_id).unwrap();
    assert_eq!(job.status, Pending);
    assert_eq!(job.attempts, 1);
    assert_eq!(job.payload.0.errors[0].message, "Interrupted by shutdown");
    assert!(deps.profile_scraper.calls().is_empty());
}

#[tokio::test]
async fn shutdown_mid_batch_finishes_current_scrape_only() {
    let deps = TestDependencies::new()
        .mock_discoverer(handles())
        .mock_scraper(MockProfileScraper::new().with_delay(Duration::from_millis(150)));
    let result = enqueue_discovery(input("cats", 3), &deps.server_deps()).await.unwrap();
    let processor = DiscoveryProcessor::new(&deps.worker_deps());

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(40)).await;
        trigger.cancel();
    });

    let outcome = processor.process_by_id(result.discovery_id, &cancel).await.unwrap();

    assert!(matches!(outcome, JobOutcome::Failed { retry: true, .. }));
    assert_eq!(deps.profile_scraper.calls(), vec!["alice"]);
    assert_eq!(deps.creator_store.handles(), vec!["alice"]);
    assert_eq!(deps.discovery_store.get(result.discovery_id).unwrap().status, Pending);
}

#[tokio::test]
async fn records_not_pending_are_skipped() {
    let deps = TestDependencies::new().mock_discoverer(handles());
    let result = enqueue_discovery(input("cats", 3), &deps.server_deps()).await.unwrap();
    let processor = DiscoveryProcessor::new(&deps.worker_deps());
    let cancel = CancellationToken::new();

    assert_eq!(
        processor.process_by_id(result.discovery_id, &cancel).await.unwrap(),
        JobOutcome::Completed
    );
    assert_eq!(
        processor.process_by_id(result.discovery_id, &cancel).await.unwrap(),
        JobOutcome::Skipped
    );
    assert_eq!(deps.discovery_store.get(result.discovery_id).unwrap().attempts, 1);
}

#[tokio::test]
async fn poll_mode_stops_claiming_after_max_attempts() {
    let deps = TestDependencies::new()
        .mock_discoverer(handles().failing_times(10))
        .discovery_config(DiscoveryConfig {
            max_attempts: 2,
            backoff_base: Duration::ZERO,
            ..DiscoveryConfig::default()
        });
    let result = enqueue_discovery(input("cats", 3), &deps.server_deps()).await.unwrap();

    let handler: Arc<dyn DiscoveryJobHandler> = Arc::new(DiscoveryProcessor::new(&deps.worker_deps()));
    let worker = DiscoveryWorker::new(Arc::new(PollStrategy::new(handler, Duration::from_millis(5))));

    assert_eq!(worker.process_one().await.unwrap(), 1);
    assert_eq!(worker.process_one().await.unwrap(), 1);
    assert_eq!(worker.process_one().await.unwrap(), 0);

    let job = deps.discovery_store.get(result.discovery_id).unwrap();
    assert_eq!(job.status, Failed);
    assert_eq!(job.attempts, 2);
}

#[tokio::test]
async fn poll_mode_reruns_a_failed_record_after_reenqueue() {
    let deps = TestDependencies::new()
        .mock_discoverer(handles().failing_times(2))
        .discovery_config(DiscoveryConfig {
            max_attempts: 2,
            backoff_base: Duration::ZERO,
            ..DiscoveryConfig::default()
        });
    let result = enqueue_discovery(input("cats", 3), &deps.server_deps()).await.unwrap();

    let handler: Arc<dyn DiscoveryJobHandler> = Arc::new(DiscoveryProcessor::new(&deps.worker_deps()));
    let worker = DiscoveryWorker::new(Arc::new(PollStrategy::new(handler, Duration::from_millis(5))));

    assert_eq!(worker.process_one().await.unwrap(), 1);
    assert_eq!(worker.process_one().await.unwrap(), 1);
    assert_eq!(deps.discovery_store.get(result.discovery_id).unwrap().status, Failed);

    enqueue_discovery(
        EnqueueDiscoveryInput {
            discovery_id: Some(result.discovery_id),
            ..input("cats", 3)
        },
        &deps.server_deps(),
    )
    .await
    .unwrap();

    let rearmed = deps.discovery_store.get(result.discovery_id).unwrap();
    assert_eq!(rearmed.status, Pending);
    assert_eq!(rearmed.attempts, 2);
    assert_eq!(rearmed.run_attempts(), 0);
    assert!(rearmed.payload.0.failed_at.is_none());
    assert_eq!(rearmed.payload.0.will_retry, None);

    assert_eq!(worker.process_one().await.unwrap(), 1);
    let job = deps.discovery_store.get(result.discovery_id).unwrap();
    assert_eq!(job.status, Completed);
    assert_eq!(job.attempts, 3);
    assert_eq!(job.run_attempts(), 1);
    assert_eq!(job.payload.0.success_count, Some(3));
    assert_eq!(job.payload.0.errors.len(), 2);
    assert!(deps
        .discovery_store
        .transitions(result.discovery_id)
        .contains(&(Failed, Pending)));
}

#[tokio::test]
async fn expired_leases_let_a_redelivery_take_over() {
    let deps = TestDependencies::new().mock_discoverer(handles());
    let result = enqueue_discovery(input("cats", 3), &deps.server_deps()).await.unwrap();

    // A worker reserves the message, takes the record, then dies.
    let abandoned = deps.discovery_queue.reserve("dead-worker", 1).await.unwrap();
    assert_eq!(abandoned.len(), 1);
    deps.discovery_store
        .mark_processing(result.discovery_id, Duration::from_secs(60))
        .await
        .unwrap()
        .unwrap();

    let worker = push_worker(&deps);
    assert_eq!(worker.process_one().await.unwrap(), 0);

    deps.discovery_queue.expire_lease(&result.job_id);
    deps.discovery_store.expire_lease(result.discovery_id);
    assert_eq!(worker.process_one().await.unwrap(), 1);

    let job = deps.discovery_store.get(result.discovery_id).unwrap();
    assert_eq!(job.status, Completed);
    assert_eq!(job.attempts, 2);
    assert_eq!(job.payload.0.success_count, Some(3));
    assert!(deps.discovery_store.lease_expires_at(result.discovery_id).is_none());
    assert_eq!(
        deps.discovery_store.transitions(result.discovery_id),
        vec![(Pending, Processing), (Processing, Processing), (Processing, Completed)]
    );

    let entry = deps.discovery_queue.entry(&result.job_id).unwrap();
    assert_eq!(entry.status, QueueEntryStatus::Completed);
    assert_eq!(entry.attempts_made, 2);
}

#[tokio::test]
async fn poll_mode_takes_over_a_stale_record() {
    let deps = TestDependencies::new().mock_discoverer(handles());
    let result = enqueue_discovery(input("cats", 3), &deps.server_deps()).await.unwrap();
    deps.discovery_store
        .mark_processing(result.discovery_id, Duration::from_secs(60))
        .await
        .unwrap()
        .unwrap();

    let handler: Arc<dyn DiscoveryJobHandler> = Arc::new(DiscoveryProcessor::new(&deps.worker_deps()));
    let worker = DiscoveryWorker::new(Arc::new(PollStrategy::new(handler, Duration::from_millis(5))));
    assert_eq!(worker.process_one().await.unwrap(), 0);

    deps.discovery_store.expire_lease(result.discovery_id);
    assert_eq!(worker.process_one().await.unwrap(), 1);
    let job = deps.discovery_store.get(result.discovery_id).unwrap();
    assert_eq!(job.status, Completed);
    assert_eq!(job.attempts, 2);
}

#[tokio::test]
async fn delivery_for_a_record_held_by_a_live_worker_is_retried() {
    let deps = TestDependencies::new().mock_discoverer(handles());
    let result = enqueue_discovery(input("cats", 3), &deps.server_deps()).await.unwrap();
    deps.discovery_store
        .mark_processing(result.discovery_id, Duration::from_secs(60))
        .await
        .unwrap()
        .unwrap();

    push_worker(&deps).process_one().await.unwrap();

    let entry = deps.discovery_queue.entry(&result.job_id).unwrap();
    assert_eq!(entry.status, QueueEntryStatus::Waiting);
    assert!(entry.last_error.unwrap().contains("held by another worker"));
    let job = deps.discovery_store.get(result.discovery_id).unwrap();
    assert_eq!(job.status, Processing);
    assert_eq!(job.attempts, 1);
    assert!(deps.discoverer.calls().is_empty());
}

#[tokio::test]
async fn takeover_past_the_attempt_budget_fails_without_running() {
    let deps = TestDependencies::new()
        .mock_discoverer(handles())
        .discovery_config(DiscoveryConfig {
            max_attempts: 2,
            backoff_base: Duration::ZERO,
            ..DiscoveryConfig::default()
        });
    let result = enqueue_discovery(input("cats", 3), &deps.server_deps()).await.unwrap();
    for _ in 0..2 {
        deps.discovery_store
            .mark_processing(result.discovery_id, Duration::from_secs(60))
            .await
            .unwrap()
            .unwrap();
        deps.discovery_store.expire_lease(result.discovery_id);
    }

    let handler: Arc<dyn DiscoveryJobHandler> = Arc::new(DiscoveryProcessor::new(&deps.worker_deps()));
    let worker = DiscoveryWorker::new(Arc::new(PollStrategy::new(handler, Duration::from_millis(5))));
    assert_eq!(worker.process_one().await.unwrap(), 1);

    let job = deps.discovery_store.get(result.discovery_id).unwrap();
    assert_eq!(job.status, Failed);
    assert_eq!(job.attempts, 3);
    assert_eq!(job.payload.0.will_retry, Some(false));
    assert_eq!(
        job.payload.0.errors.last().map(|e| e.message.as_str()),
        Some("Attempt budget of 2 exhausted")
    );
    assert!(deps.discoverer.calls().is_empty());
    assert_eq!(worker.process_one().await.unwrap(), 0);
}

#[tokio::test]
async fn long_batches_keep_their_leases_alive() {
    let deps = TestDependencies::new()
        .mock_discoverer(handles())
        .mock_scraper(MockProfileScraper::new().with_delay(Duration::from_millis(40)))
        .discovery_config(DiscoveryConfig {
            lease: Duration::from_millis(30),
            backoff_base: Duration::ZERO,
            ..DiscoveryConfig::default()
        });
    let result = enqueue_discovery(input("cats", 3), &deps.server_deps()).await.unwrap();

    let handler: Arc<dyn DiscoveryJobHandler> = Arc::new(DiscoveryProcessor::new(&deps.worker_deps()));
    let queue: Arc<dyn BaseDiscoveryQueue> = deps.discovery_queue.clone();
    let strategy = PushStrategy::new(queue, handler, "test-worker", 1).with_heartbeat_interval(Duration::from_millis(10));
    let worker = DiscoveryWorker::new(Arc::new(strategy));

    assert_eq!(worker.process_one().await.unwrap(), 1);

    let job = deps.discovery_store.get(result.discovery_id).unwrap();
    assert_eq!(job.status, Completed);
    assert_eq!(job.attempts, 1);
    assert!(deps.discovery_store.lease_renewals() >= 1);
    assert!(deps.discovery_queue.heartbeats() >= 1);
    assert!(deps.discovery_store.lease_expires_at(result.discovery_id).is_none());
}

#[tokio::test(start_paused = true)]
async fn scrapes_are_spaced_by_the_rate_limit() {
    let rate_limit = Duration::from_secs(2);
    let deps = TestDependencies::new()
        .mock_discoverer(MockHashtagDiscoverer::new().with_handles(&["alice", "bob", "carol", "dave"]))
        .mock_scraper(MockProfileScraper::new().with_failure("bob"))
        .creators(InMemoryCreatorStore::new().with_existing(&["carol"]))
        .rate_limit(rate_limit);
    let result = enqueue_discovery(input("cats", 4), &deps.server_deps()).await.unwrap();
    let processor = DiscoveryProcessor::new(&deps.worker_deps());

    let started = Instant::now();
    let outcome = processor
        .process_by_id(result.discovery_id, &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(outcome, JobOutcome::Completed);

    // Known creators are skipped without waiting; a failed scrape still counts.
    assert_eq!(deps.profile_scraper.calls(), vec!["alice", "bob", "dave"]);
    let at = deps.profile_scraper.started_at();
    assert!(at[0].duration_since(started) < rate_limit);
    assert!(at[1].duration_since(at[0]) >= rate_limit);
    assert!(at[2].duration_since(at[1]) >= rate_limit);
    assert!(at[2].duration_since(at[1]) < rate_limit * 2);

    let job = deps.discovery_store.get(result.discovery_id).unwrap();
    assert_eq!(job.payload.0.success_count, Some(2));
    assert_eq!(job.payload.0.skip_count, Some(1));
}

#[tokio::test(start_paused = true)]
async fn shutdown_during_rate_limit_wait_interrupts() {
    let deps = TestDependencies::new()
        .mock_discoverer(handles())
        .rate_limit(Duration::from_secs(60));
    let result = enqueue_discovery(input("cats", 3), &deps.server_deps()).await.unwrap();
    let processor = DiscoveryProcessor::new(&deps.worker_deps());

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(1)).await;
        trigger.cancel();
    });

    let started = Instant::now();
    let outcome = processor.process_by_id(result.discovery_id, &cancel).await.unwrap();

    assert!(matches!(outcome, JobOutcome::Failed { retry: true, .. }));
    assert!(started.elapsed() < Duration::from_secs(60));
    assert_eq!(deps.profile_scraper.calls(), vec!["alice"]);
    assert_eq!(deps.discovery_store.get(result.discovery_id).unwrap().status, Pending);
}
