//! Discovery worker: a long-running loop over one consumption strategy.
//!
//! ```text
//! DiscoveryWorker
//!     │
//!     ├─► PushStrategy: reserve N queue messages, process concurrently
//!     │                 under a lease heartbeat, complete / fail (queue
//!     │                 backoff) each delivery
//!     │
//!     └─► PollStrategy: claim the oldest pending record, process it alone
//! ```
//!
//! The worker only drives intake; what "processing" means is supplied by a
//! [`DiscoveryJobHandler`] from the discovery domain.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::message::DiscoveryMessage;
use super::queue::{BaseDiscoveryQueue, Delivery};

/// What happened to one job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    Completed,
    /// The record was not pending; nothing was done.
    Skipped,
    Failed { error: String, retry: bool },
}

#[async_trait]
pub trait DiscoveryJobHandler: Send + Sync {
    /// Process the record a queue message points at.
    async fn handle_message(&self, message: &DiscoveryMessage, cancel: &CancellationToken) -> JobOutcome;

    /// Claim and process the oldest pending record. `None` when nothing was ready.
    async fn handle_next_pending(&self, cancel: &CancellationToken) -> Result<Option<JobOutcome>>;
}

#[async_trait]
pub trait ConsumptionStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    /// One intake round. Returns how many jobs were handled.
    async fn run_once(&self, cancel: &CancellationToken) -> Result<usize>;

    /// Sleep between rounds that found nothing.
    fn idle_delay(&self) -> Duration;

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

// =============================================================================
// Push
// =============================================================================

pub struct PushStrategy {
    queue: Arc<dyn BaseDiscoveryQueue>,
    handler: Arc<dyn DiscoveryJobHandler>,
    worker_id: String,
    concurrency: usize,
    idle_delay: Duration,
    heartbeat_interval: Duration,
}

impl PushStrategy {
    pub fn new(
        queue: Arc<dyn BaseDiscoveryQueue>,
        handler: Arc<dyn DiscoveryJobHandler>,
        worker_id: impl Into<String>,
        concurrency: usize,
    ) -> Self {
        Self {
            queue,
            handler,
            worker_id: worker_id.into(),
            concurrency: concurrency.max(1),
            idle_delay: Duration::from_secs(1),
            heartbeat_interval: Duration::from_secs(100),
        }
    }

    pub fn with_idle_delay(mut self, delay: Duration) -> Self {
        self.idle_delay = delay;
        self
    }

    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval.max(Duration::from_millis(1));
        self
    }

    /// Run the handler while renewing the delivery's lease.
    async fn handle_with_heartbeat(&self, delivery: &Delivery, cancel: &CancellationToken) -> JobOutcome {
        let queue = self.queue.clone();
        let leased = delivery.clone();
        let heartbeat_interval = self.heartbeat_interval;

        let heartbeat_cancel = CancellationToken::new();
        let stop = heartbeat_cancel.clone();
        let heartbeat_handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(heartbeat_interval);
            interval.tick().await; // first tick is immediate

            loop {
                tokio::select! {
                    _ = stop.cancelled() => break,
                    _ = interval.tick() => {
                        if let Err(e) = queue.heartbeat(&leased).await {
                            warn!(job_id = %leased.job_id, error = %e, "Queue heartbeat failed");
                        }
                    }
                }
            }
        });

        let outcome = self.handler.handle_message(&delivery.message, cancel).await;

        heartbeat_cancel.cancel();
        let _ = heartbeat_handle.await;
        outcome
    }

    async fn process_delivery(&self, delivery: Delivery, cancel: &CancellationToken) {
        let discovery_id = delivery.message.discovery_id;
        let outcome = self.handle_with_heartbeat(&delivery, cancel).await;

        let ack = match &outcome {
            JobOutcome::Completed | JobOutcome::Skipped => self.queue.complete(&delivery).await,
            JobOutcome::Failed { error, retry } => {
                warn!(
                    job_id = %delivery.job_id,
                    discovery_id = %discovery_id,
                    attempt = delivery.attempt,
                    retry,
                    error = %error,
                    "Discovery job failed"
                );
                self.queue.fail(&delivery, error, *retry).await
            }
        };

        if let Err(e) = ack {
            error!(job_id = %delivery.job_id, error = %e, "Failed to acknowledge queue message");
        }
    }
}

#[async_trait]
impl ConsumptionStrategy for PushStrategy {
    fn name(&self) -> &'static str {
        "push"
    }

    async fn run_once(&self, cancel: &CancellationToken) -> Result<usize> {
        let deliveries = self.queue.reserve(&self.worker_id, self.concurrency).await?;
        let count = deliveries.len();
        if count == 0 {
            return Ok(0);
        }

        debug!(count, "Processing reserved deliveries");
        let tasks = deliveries
            .into_iter()
            .map(|delivery| self.process_delivery(delivery, cancel));
        futures::future::join_all(tasks).await;
        Ok(count)
    }

    fn idle_delay(&self) -> Duration {
        self.idle_delay
    }

    async fn close(&self) -> Result<()> {
        self.queue.close().await
    }
}

// =============================================================================
// Poll
// =============================================================================

pub struct PollStrategy {
    handler: Arc<dyn DiscoveryJobHandler>,
    interval: Duration,
}

impl PollStrategy {
    pub fn new(handler: Arc<dyn DiscoveryJobHandler>, interval: Duration) -> Self {
        Self { handler, interval }
    }
}

#[async_trait]
impl ConsumptionStrategy for PollStrategy {
    fn name(&self) -> &'static str {
        "poll"
    }

    async fn run_once(&self, cancel: &CancellationToken) -> Result<usize> {
        match self.handler.handle_next_pending(cancel).await? {
            Some(JobOutcome::Failed { error, retry }) => {
                warn!(retry, error = %error, "Discovery job failed");
                Ok(1)
            }
            Some(_) => Ok(1),
            None => Ok(0),
        }
    }

    fn idle_delay(&self) -> Duration {
        self.interval
    }
}

// =============================================================================
// Worker
// =============================================================================

pub fn new_worker_id() -> String {
    format!("worker-{}", Uuid::new_v4())
}

pub struct DiscoveryWorker {
    strategy: Arc<dyn ConsumptionStrategy>,
    shutdown: CancellationToken,
    error_backoff: Duration,
}

impl DiscoveryWorker {
    pub fn new(strategy: Arc<dyn ConsumptionStrategy>) -> Self {
        Self {
            strategy,
            shutdown: CancellationToken::new(),
            error_backoff: Duration::from_secs(5),
        }
    }

    pub fn with_shutdown(mut self, shutdown: CancellationToken) -> Self {
        self.shutdown = shutdown;
        self
    }

    pub fn with_error_backoff(mut self, backoff: Duration) -> Self {
        self.error_backoff = backoff;
        self
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Run one intake round without looping.
    pub async fn process_one(&self) -> Result<usize> {
        self.strategy.run_once(&self.shutdown).await
    }

    /// Spawn the consumer loop.
    pub fn start(self: Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(async move { self.run().await })
    }

    /// Stop taking new jobs. The job in flight runs to its next checkpoint.
    pub fn stop(&self) {
        self.shutdown.cancel();
    }

    pub async fn run(&self) {
        info!(strategy = self.strategy.name(), "Discovery worker starting");

        loop {
            if self.shutdown.is_cancelled() {
                break;
            }

            let delay = match self.strategy.run_once(&self.shutdown).await {
                Ok(0) => self.strategy.idle_delay(),
                Ok(handled) => {
                    debug!(handled, "Intake round finished");
                    continue;
                }
                Err(e) => {
                    warn!(error = %e, "Intake round failed, backing off");
                    self.error_backoff
                }
            };

            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }

        if let Err(e) = self.strategy.close().await {
            warn!(error = %e, "Failed to close consumer");
        }
        info!(strategy = self.strategy.name(), "Discovery worker stopped");
    }
}
