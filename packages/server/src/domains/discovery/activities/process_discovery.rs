//! Run one discovery job: find handles for the hashtag, scrape the new ones,
//! and record the outcome on the discovery record.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::common::{DiscoveryJobId, PipelineError};
use crate::domains::discovery::models::{CompletionStats, DiscoveryJob, DiscoveryStatus};
use crate::kernel::jobs::{DiscoveryJobHandler, DiscoveryMessage, JobOutcome};
use crate::kernel::{BaseCreatorStore, BaseDiscoveryStore, BaseHashtagDiscoverer, BaseProfileScraper, WorkerDeps};

pub struct DiscoveryProcessor {
    store: Arc<dyn BaseDiscoveryStore>,
    creators: Arc<dyn BaseCreatorStore>,
    discoverer: Arc<dyn BaseHashtagDiscoverer>,
    scraper: Arc<dyn BaseProfileScraper>,
    max_attempts: i32,
    candidate_cap: usize,
    rate_limit: Duration,
    lease: Duration,
    heartbeat: Duration,
}

impl DiscoveryProcessor {
    pub fn new(deps: &WorkerDeps) -> Self {
        Self {
            store: deps.discovery_store.clone(),
            creators: deps.creator_store.clone(),
            discoverer: deps.discoverer.clone(),
            scraper: deps.profile_scraper.clone(),
            max_attempts: deps.discovery.max_attempts,
            candidate_cap: deps.discovery.candidate_cap,
            rate_limit: deps.rate_limit,
            lease: deps.discovery.lease,
            heartbeat: deps.discovery.heartbeat_interval(),
        }
    }

    /// Move the record to `processing` and run it.
    ///
    /// A record whose lease another worker still holds is handed back to the
    /// queue for a later delivery; any other record that is not pending is
    /// left alone.
    pub async fn process_by_id(&self, id: DiscoveryJobId, cancel: &CancellationToken) -> Result<JobOutcome> {
        if let Some(job) = self.store.mark_processing(id, self.lease).await? {
            return Ok(self.process(job, cancel).await);
        }

        match self.store.find(id).await? {
            Some(job) if job.status == DiscoveryStatus::Processing => {
                info!(discovery_id = %id, "Discovery is held by another worker, retrying later");
                Ok(JobOutcome::Failed {
                    error: format!("discovery {} is held by another worker", id),
                    retry: true,
                })
            }
            _ => {
                info!(discovery_id = %id, "Discovery is not pending, skipping");
                Ok(JobOutcome::Skipped)
            }
        }
    }

    /// Run a record that is already `processing`.
    pub async fn process(&self, job: DiscoveryJob, cancel: &CancellationToken) -> JobOutcome {
        info!(
            discovery_id = %job.id,
            hashtag = %job.payload.0.hashtag,
            attempt = job.run_attempts(),
            "Processing discovery"
        );

        // A record taken over from a dead worker can arrive with its budget spent.
        if job.run_attempts() > self.max_attempts {
            let err = PipelineError::AttemptsExhausted(self.max_attempts);
            if let Err(e) = self.record_failure(&job, &err, false).await {
                error!(discovery_id = %job.id, error = %e, "Failed to record discovery failure");
            }
            return JobOutcome::Failed {
                error: err.to_string(),
                retry: false,
            };
        }

        match self.run_with_heartbeat(&job, cancel).await {
            Ok(stats) => match self.record_completion(&job, stats).await {
                Ok(()) => {
                    info!(
                        discovery_id = %job.id,
                        success = stats.success_count,
                        skipped = stats.skip_count,
                        total = stats.total_processed,
                        "Discovery completed"
                    );
                    JobOutcome::Completed
                }
                Err(e) => {
                    error!(discovery_id = %job.id, error = %e, "Failed to record completion");
                    JobOutcome::Failed {
                        error: e.to_string(),
                        retry: true,
                    }
                }
            },
            Err(err) => {
                let will_retry = job.run_attempts() < self.max_attempts;
                if let Err(e) = self.record_failure(&job, &err, will_retry).await {
                    error!(discovery_id = %job.id, error = %e, "Failed to record discovery failure");
                }
                JobOutcome::Failed {
                    error: err.to_string(),
                    retry: will_retry,
                }
            }
        }
    }

    /// Run the batch while a background task keeps the record's lease alive.
    async fn run_with_heartbeat(
        &self,
        job: &DiscoveryJob,
        cancel: &CancellationToken,
    ) -> Result<CompletionStats, PipelineError> {
        let stop = CancellationToken::new();
        let heartbeat = {
            let store = self.store.clone();
            let stop = stop.clone();
            let id = job.id;
            let lease = self.lease;
            let period = self.heartbeat;
            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(period);
                ticker.tick().await;
                loop {
                    tokio::select! {
                        _ = stop.cancelled() => break,
                        _ = ticker.tick() => {
                            if let Err(e) = store.extend_lease(id, lease).await {
                                warn!(discovery_id = %id, error = %e, "Discovery heartbeat failed");
                            }
                        }
                    }
                }
            })
        };

        let result = self.run_batch(job, cancel).await;
        stop.cancel();
        let _ = heartbeat.await;
        result
    }

    async fn run_batch(&self, job: &DiscoveryJob, cancel: &CancellationToken) -> Result<CompletionStats, PipelineError> {
        let payload = &job.payload.0;
        let hashtag = if payload.hashtag.is_empty() {
            job.source.trim_start_matches("hashtag:").to_string()
        } else {
            payload.hashtag.clone()
        };
        let limit = payload.limit.max(0) as usize;

        let handles = self.discoverer.discover(&hashtag, self.candidate_cap).await?;
        debug!(discovery_id = %job.id, found = handles.len(), limit, "Candidates discovered");

        let mut stats = CompletionStats::default();
        let mut scraped_before = false;

        for handle in handles.iter().take(limit) {
            if cancel.is_cancelled() {
                info!(discovery_id = %job.id, processed = stats.total_processed, "Shutdown requested, abandoning batch");
                return Err(PipelineError::Interrupted);
            }

            stats.total_processed += 1;

            if self.creators.exists_by_handle(handle).await? {
                debug!(handle = %handle, "Creator already known, skipping");
                stats.skip_count += 1;
                continue;
            }

            if scraped_before && !self.rate_limit.is_zero() {
                tokio::select! {
                    _ = cancel.cancelled() => return Err(PipelineError::Interrupted),
                    _ = tokio::time::sleep(self.rate_limit) => {}
                }
            }
            scraped_before = true;

            match self.scraper.scrape_profile(handle).await {
                Ok(profile) => {
                    self.creators.upsert(&profile, &job.source).await?;
                    stats.success_count += 1;
                }
                Err(e) => {
                    warn!(discovery_id = %job.id, handle = %handle, error = %e, "Profile scrape failed, continuing");
                }
            }
        }

        Ok(stats)
    }

    async fn record_completion(&self, job: &DiscoveryJob, stats: CompletionStats) -> Result<()> {
        let now = Utc::now();
        let mut payload = self
            .store
            .find(job.id)
            .await?
            .map(|current| current.payload.0)
            .unwrap_or_else(|| job.payload.0.clone());

        payload.success_count = Some(stats.success_count);
        payload.skip_count = Some(stats.skip_count);
        payload.total_processed = Some(stats.total_processed);
        payload.completed_at = Some(now);
        payload.will_retry = None;
        payload.status_updated_at = Some(now);

        if !self.store.finish(job.id, DiscoveryStatus::Completed, &payload).await? {
            warn!(discovery_id = %job.id, "Discovery was no longer processing at completion");
        }
        Ok(())
    }

    async fn record_failure(&self, job: &DiscoveryJob, err: &PipelineError, will_retry: bool) -> Result<()> {
        let now = Utc::now();
        let mut payload = self
            .store
            .find(job.id)
            .await?
            .map(|current| current.payload.0)
            .unwrap_or_else(|| job.payload.0.clone());

        payload.push_error(err.to_string(), now);
        payload.will_retry = Some(will_retry);
        payload.status_updated_at = Some(now);
        let status = if will_retry {
            DiscoveryStatus::Pending
        } else {
            payload.failed_at = Some(now);
            DiscoveryStatus::Failed
        };

        warn!(
            discovery_id = %job.id,
            attempt = job.run_attempts(),
            max_attempts = self.max_attempts,
            next_status = %status,
            error = %err,
            "Discovery batch failed"
        );

        if !self.store.finish(job.id, status, &payload).await? {
            warn!(discovery_id = %job.id, "Discovery was no longer processing at failure");
        }
        Ok(())
    }
}

#[async_trait]
impl DiscoveryJobHandler for DiscoveryProcessor {
    async fn handle_message(&self, message: &DiscoveryMessage, cancel: &CancellationToken) -> JobOutcome {
        match self.process_by_id(message.discovery_id, cancel).await {
            Ok(outcome) => outcome,
            Err(e) => JobOutcome::Failed {
                error: format!("{:#}", e),
                retry: true,
            },
        }
    }

    async fn handle_next_pending(&self, cancel: &CancellationToken) -> Result<Option<JobOutcome>> {
        match self.store.claim_next_pending(self.max_attempts, self.lease).await? {
            Some(job) => Ok(Some(self.process(job, cancel).await)),
            None => Ok(None),
        }
    }
}
