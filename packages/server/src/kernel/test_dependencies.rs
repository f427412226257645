// TestDependencies - in-memory stores and mock services for testing
//
// Everything here implements the same Base* traits the Postgres and HTTP
// adapters do, so the sync service, the discovery processor and the worker
// run unchanged against them.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::types::Json;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use super::browser::{BaseBrowser, BasePage, ContextOptions, Cookie};
use super::deps::{ServerDeps, WorkerDeps};
use super::jobs::{notify_enqueued, BaseDiscoveryQueue, Delivery, DiscoveryMessage, RetryPolicy};
use super::nats::NatsPublisher;
use super::{
    BaseCreatorStore, BaseCredentialStore, BaseDatabaseProbe, BaseDiscoveryStore, BaseHashtagDiscoverer,
    BaseProfileScraper, BaseTikTokApi, BaseTokenRefresher, BaseVideoStore, RefreshedTokens, TikTokApiFactory,
};
use crate::common::{CreatorId, DiscoveryJobId, PipelineError, TokenCipher, UserId};
use crate::config::DiscoveryConfig;
use crate::domains::creators::CreatorProfile;
use crate::domains::credentials::{Credential, TokenManager};
use crate::domains::discovery::models::{DiscoveryJob, DiscoveryPayload, DiscoveryStatus, NewDiscoveryJob, QueueLink};
use crate::domains::scraping::ScrapedProfile;
use crate::domains::sync::{SyncService, VideoUpsert};

/// 32-byte key used by test ciphers.
pub const TEST_ENCRYPTION_KEY: &str = "000102030405060708090a0b0c0d0e0f101112131415161718191a1b1c1d1e1f";

// =============================================================================
// Discovery Record Store
// =============================================================================

#[derive(Default)]
pub struct InMemoryDiscoveryStore {
    records: Mutex<HashMap<DiscoveryJobId, DiscoveryJob>>,
    transitions: Mutex<Vec<(DiscoveryJobId, DiscoveryStatus, DiscoveryStatus)>>,
    leases: Mutex<HashMap<DiscoveryJobId, DateTime<Utc>>>,
    lease_renewals: AtomicUsize,
}

impl InMemoryDiscoveryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: DiscoveryJobId) -> Option<DiscoveryJob> {
        self.records.lock().unwrap().get(&id).cloned()
    }

    pub fn all(&self) -> Vec<DiscoveryJob> {
        let mut jobs: Vec<_> = self.records.lock().unwrap().values().cloned().collect();
        jobs.sort_by_key(|j| j.created_at);
        jobs
    }

    pub fn len(&self) -> usize {
        self.records.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Status moves recorded for one record, oldest first.
    pub fn transitions(&self, id: DiscoveryJobId) -> Vec<(DiscoveryStatus, DiscoveryStatus)> {
        self.transitions
            .lock()
            .unwrap()
            .iter()
            .filter(|(job, _, _)| *job == id)
            .map(|(_, from, to)| (*from, *to))
            .collect()
    }

    /// Expire the lease as if the worker holding the record had died.
    pub fn expire_lease(&self, id: DiscoveryJobId) {
        self.leases
            .lock()
            .unwrap()
            .insert(id, Utc::now() - chrono::Duration::seconds(1));
    }

    pub fn lease_expires_at(&self, id: DiscoveryJobId) -> Option<DateTime<Utc>> {
        self.leases.lock().unwrap().get(&id).copied()
    }

    /// How many heartbeats renewed a lease.
    pub fn lease_renewals(&self) -> usize {
        self.lease_renewals.load(Ordering::SeqCst)
    }

    fn lease_expired(&self, id: DiscoveryJobId) -> bool {
        self.leases
            .lock()
            .unwrap()
            .get(&id)
            .map_or(false, |expires| *expires < Utc::now())
    }

    fn record_transition(&self, id: DiscoveryJobId, from: DiscoveryStatus, to: DiscoveryStatus) {
        self.transitions.lock().unwrap().push((id, from, to));
    }

    fn start_processing(&self, job: &mut DiscoveryJob, lease: Duration) {
        let now = Utc::now();
        self.record_transition(job.id, job.status, DiscoveryStatus::Processing);
        job.status = DiscoveryStatus::Processing;
        job.attempts += 1;
        job.last_attempt_at = Some(now);
        job.payload.0.processing_started_at = Some(now);
        job.updated_at = now;
        self.leases.lock().unwrap().insert(job.id, now + lease_duration(lease));
    }

    fn can_take(&self, job: &DiscoveryJob) -> bool {
        job.status == DiscoveryStatus::Pending
            || (job.status == DiscoveryStatus::Processing && self.lease_expired(job.id))
    }
}

fn lease_duration(lease: Duration) -> chrono::Duration {
    chrono::Duration::from_std(lease).unwrap_or_else(|_| chrono::Duration::days(365))
}

#[async_trait]
impl BaseDiscoveryStore for InMemoryDiscoveryStore {
    async fn create(&self, new: NewDiscoveryJob) -> Result<DiscoveryJob> {
        let mut records = self.records.lock().unwrap();
        if records.contains_key(&new.id) {
            return Err(anyhow!("duplicate discovery id {}", new.id));
        }
        let now = Utc::now();
        let job = DiscoveryJob {
            id: new.id,
            identifier: new.identifier,
            source: new.source,
            status: DiscoveryStatus::Pending,
            attempts: 0,
            attempt_base: 0,
            last_attempt_at: None,
            payload: Json(new.payload),
            created_at: now,
            updated_at: now,
        };
        records.insert(job.id, job.clone());
        Ok(job)
    }

    async fn find(&self, id: DiscoveryJobId) -> Result<Option<DiscoveryJob>> {
        Ok(self.get(id))
    }

    async fn link_queue(&self, id: DiscoveryJobId, link: &QueueLink) -> Result<()> {
        let mut records = self.records.lock().unwrap();
        let job = records.get_mut(&id).ok_or_else(|| anyhow!("discovery {} not found", id))?;
        job.payload.0.queue = Some(link.clone());
        job.updated_at = Utc::now();
        Ok(())
    }

    async fn rearm(&self, id: DiscoveryJobId, payload: &DiscoveryPayload) -> Result<Option<DiscoveryJob>> {
        let mut records = self.records.lock().unwrap();
        let Some(job) = records.get_mut(&id) else {
            return Ok(None);
        };
        job.payload = Json(payload.clone());
        if job.status.is_terminal() {
            job.attempt_base = job.attempts;
        }
        if job.status != DiscoveryStatus::Processing {
            if job.status != DiscoveryStatus::Pending {
                self.record_transition(id, job.status, DiscoveryStatus::Pending);
            }
            job.status = DiscoveryStatus::Pending;
        }
        job.updated_at = Utc::now();
        Ok(Some(job.clone()))
    }

    async fn mark_processing(&self, id: DiscoveryJobId, lease: Duration) -> Result<Option<DiscoveryJob>> {
        let mut records = self.records.lock().unwrap();
        match records.get_mut(&id) {
            Some(job) if self.can_take(job) => {
                self.start_processing(job, lease);
                Ok(Some(job.clone()))
            }
            _ => Ok(None),
        }
    }

    async fn claim_next_pending(&self, max_attempts: i32, lease: Duration) -> Result<Option<DiscoveryJob>> {
        let mut records = self.records.lock().unwrap();
        let next = records
            .values()
            .filter(|j| {
                (j.status == DiscoveryStatus::Pending && j.run_attempts() < max_attempts)
                    || (j.status == DiscoveryStatus::Processing && self.lease_expired(j.id))
            })
            .min_by_key(|j| j.created_at)
            .map(|j| j.id);
        let Some(id) = next else {
            return Ok(None);
        };
        let Some(job) = records.get_mut(&id) else {
            return Ok(None);
        };
        self.start_processing(job, lease);
        Ok(Some(job.clone()))
    }

    async fn extend_lease(&self, id: DiscoveryJobId, lease: Duration) -> Result<()> {
        let records = self.records.lock().unwrap();
        if records.get(&id).map(|j| j.status) == Some(DiscoveryStatus::Processing) {
            self.leases
                .lock()
                .unwrap()
                .insert(id, Utc::now() + lease_duration(lease));
            self.lease_renewals.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }

    async fn finish(&self, id: DiscoveryJobId, status: DiscoveryStatus, payload: &DiscoveryPayload) -> Result<bool> {
        let mut records = self.records.lock().unwrap();
        let Some(job) = records.get_mut(&id) else {
            return Ok(false);
        };
        if job.status != DiscoveryStatus::Processing || !job.status.can_transition_to(status) {
            return Ok(false);
        }
        self.record_transition(id, job.status, status);
        self.leases.lock().unwrap().remove(&id);
        job.status = status;
        job.payload = Json(payload.clone());
        job.updated_at = Utc::now();
        Ok(true)
    }
}

// =============================================================================
// Creator Store
// =============================================================================

#[derive(Default)]
pub struct InMemoryCreatorStore {
    creators: Mutex<Vec<CreatorProfile>>,
    unavailable: AtomicBool,
}

impl InMemoryCreatorStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed creators that already exist.
    pub fn with_existing(self, handles: &[&str]) -> Self {
        for handle in handles {
            let profile = ScrapedProfile {
                username: handle.to_string(),
                ..Default::default()
            };
            self.creators
                .lock()
                .unwrap()
                .push(Self::build(&profile, "seed", None));
        }
        self
    }

    /// Make every call fail as if the database were down.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    pub fn handles(&self) -> Vec<String> {
        self.creators.lock().unwrap().iter().map(|c| c.username.clone()).collect()
    }

    pub fn find(&self, handle: &str) -> Option<CreatorProfile> {
        let lower = handle.to_lowercase();
        self.creators
            .lock()
            .unwrap()
            .iter()
            .find(|c| c.username.to_lowercase() == lower)
            .cloned()
    }

    fn build(profile: &ScrapedProfile, source: &str, existing: Option<&CreatorProfile>) -> CreatorProfile {
        let now = Utc::now();
        CreatorProfile {
            id: existing.map(|c| c.id).unwrap_or_else(CreatorId::new),
            platform_id: CreatorProfile::platform_id_for(&profile.username),
            username: existing.map(|c| c.username.clone()).unwrap_or_else(|| profile.username.clone()),
            follower_count: profile.follower_count,
            following_count: profile.following_count,
            total_likes: profile.total_likes,
            video_count: profile.video_count,
            bio: profile.bio.clone(),
            avatar_url: profile.avatar_url.clone(),
            profile_data: Json(CreatorProfile::profile_data_for(profile, source, now)),
            last_scraped_at: Some(now),
            created_at: existing.map(|c| c.created_at).unwrap_or(now),
            updated_at: now,
        }
    }

    fn check_available(&self) -> Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(anyhow!("creator store unavailable"));
        }
        Ok(())
    }
}

#[async_trait]
impl BaseCreatorStore for InMemoryCreatorStore {
    async fn exists_by_handle(&self, handle: &str) -> Result<bool> {
        self.check_available()?;
        Ok(self.find(handle).is_some())
    }

    async fn upsert(&self, profile: &ScrapedProfile, source: &str) -> Result<CreatorProfile> {
        self.check_available()?;
        let lower = profile.username.to_lowercase();
        let mut creators = self.creators.lock().unwrap();
        let position = creators.iter().position(|c| c.username.to_lowercase() == lower);
        let record = Self::build(profile, source, position.map(|i| &creators[i]));
        match position {
            Some(i) => creators[i] = record.clone(),
            None => creators.push(record.clone()),
        }
        Ok(record)
    }
}

// =============================================================================
// Credential Store
// =============================================================================

#[derive(Default)]
pub struct InMemoryCredentialStore {
    credentials: Mutex<HashMap<UserId, Credential>>,
}

impl InMemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, credential: Credential) {
        self.credentials
            .lock()
            .unwrap()
            .insert(credential.user_id, credential);
    }

    pub fn get(&self, user_id: UserId) -> Option<Credential> {
        self.credentials.lock().unwrap().get(&user_id).cloned()
    }
}

#[async_trait]
impl BaseCredentialStore for InMemoryCredentialStore {
    async fn find_credential(&self, user_id: UserId) -> Result<Option<Credential>> {
        Ok(self.get(user_id))
    }

    async fn save_tokens(
        &self,
        user_id: UserId,
        access_token_encrypted: &str,
        refresh_token_encrypted: Option<&str>,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<()> {
        let mut credentials = self.credentials.lock().unwrap();
        let entry = credentials.entry(user_id).or_insert_with(|| Credential {
            user_id,
            access_token_encrypted: None,
            refresh_token_encrypted: None,
            token_expires_at: None,
        });
        entry.access_token_encrypted = Some(access_token_encrypted.to_string());
        if let Some(refresh) = refresh_token_encrypted {
            entry.refresh_token_encrypted = Some(refresh.to_string());
        }
        entry.token_expires_at = expires_at;
        Ok(())
    }
}

// =============================================================================
// Video Store
// =============================================================================

#[derive(Default)]
pub struct InMemoryVideoStore {
    profiles: Mutex<HashMap<UserId, tiktok_client::UserInfo>>,
    videos: Mutex<HashMap<String, (UserId, VideoUpsert)>>,
}

impl InMemoryVideoStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn profile(&self, user_id: UserId) -> Option<tiktok_client::UserInfo> {
        self.profiles.lock().unwrap().get(&user_id).cloned()
    }

    pub fn video(&self, platform_id: &str) -> Option<VideoUpsert> {
        self.videos.lock().unwrap().get(platform_id).map(|(_, v)| v.clone())
    }

    pub fn video_count(&self) -> usize {
        self.videos.lock().unwrap().len()
    }
}

#[async_trait]
impl BaseVideoStore for InMemoryVideoStore {
    async fn update_user_profile(&self, user_id: UserId, info: &tiktok_client::UserInfo) -> Result<()> {
        self.profiles.lock().unwrap().insert(user_id, info.clone());
        Ok(())
    }

    async fn upsert_videos(&self, user_id: UserId, videos: &[tiktok_client::Video]) -> Result<usize> {
        let mut stored = self.videos.lock().unwrap();
        for video in videos {
            stored.insert(video.id.clone(), (user_id, VideoUpsert::from(video)));
        }
        Ok(videos.len())
    }
}

// =============================================================================
// Discovery Queue
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueEntryStatus {
    Waiting,
    Active,
    Completed,
    Failed,
}

#[derive(Debug, Clone)]
pub struct QueueEntry {
    pub job_id: String,
    pub message: DiscoveryMessage,
    pub status: QueueEntryStatus,
    pub attempts_made: i32,
    pub run_at: DateTime<Utc>,
    pub lease_expires_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

pub struct InMemoryDiscoveryQueue {
    entries: Mutex<Vec<QueueEntry>>,
    policy: RetryPolicy,
    lease: Duration,
    next_id: AtomicUsize,
    heartbeats: AtomicUsize,
    unavailable: AtomicBool,
    nats: Option<Arc<dyn NatsPublisher>>,
}

impl InMemoryDiscoveryQueue {
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            entries: Mutex::new(Vec::new()),
            policy,
            lease: Duration::from_secs(300),
            next_id: AtomicUsize::new(1),
            heartbeats: AtomicUsize::new(0),
            unavailable: AtomicBool::new(false),
            nats: None,
        }
    }

    pub fn with_lease(mut self, lease: Duration) -> Self {
        self.lease = lease;
        self
    }

    /// Expire an active entry's lease as if its worker had died.
    pub fn expire_lease(&self, job_id: &str) {
        let mut entries = self.entries.lock().unwrap();
        if let Some(entry) = entries.iter_mut().find(|e| e.job_id == job_id) {
            entry.lease_expires_at = Some(Utc::now() - chrono::Duration::seconds(1));
        }
    }

    pub fn heartbeats(&self) -> usize {
        self.heartbeats.load(Ordering::SeqCst)
    }

    pub fn with_nats(mut self, nats: Arc<dyn NatsPublisher>) -> Self {
        self.nats = Some(nats);
        self
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    pub fn entries(&self) -> Vec<QueueEntry> {
        self.entries.lock().unwrap().clone()
    }

    pub fn entry(&self, job_id: &str) -> Option<QueueEntry> {
        self.entries.lock().unwrap().iter().find(|e| e.job_id == job_id).cloned()
    }

    fn check_available(&self) -> Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(anyhow!("queue unavailable"));
        }
        Ok(())
    }

    fn update(&self, job_id: &str, apply: impl FnOnce(&mut QueueEntry)) -> Result<()> {
        let mut entries = self.entries.lock().unwrap();
        let entry = entries
            .iter_mut()
            .find(|e| e.job_id == job_id)
            .ok_or_else(|| anyhow!("unknown queue job {}", job_id))?;
        apply(entry);
        Ok(())
    }
}

#[async_trait]
impl BaseDiscoveryQueue for InMemoryDiscoveryQueue {
    async fn add(&self, message: &DiscoveryMessage) -> Result<String> {
        self.check_available()?;
        let job_id = format!("mem-{}", self.next_id.fetch_add(1, Ordering::SeqCst));
        self.entries.lock().unwrap().push(QueueEntry {
            job_id: job_id.clone(),
            message: message.clone(),
            status: QueueEntryStatus::Waiting,
            attempts_made: 0,
            run_at: Utc::now(),
            lease_expires_at: None,
            last_error: None,
        });
        notify_enqueued(self.nats.as_ref(), &job_id, message).await;
        Ok(job_id)
    }

    async fn reserve(&self, _worker_id: &str, limit: usize) -> Result<Vec<Delivery>> {
        self.check_available()?;
        let now = Utc::now();
        let mut entries = self.entries.lock().unwrap();
        let mut reserved = Vec::new();
        for entry in entries.iter_mut() {
            if reserved.len() >= limit {
                break;
            }
            let ready = entry.status == QueueEntryStatus::Waiting && entry.run_at <= now;
            let abandoned = entry.status == QueueEntryStatus::Active
                && entry.lease_expires_at.map_or(false, |expires| expires < now);
            if ready || abandoned {
                entry.status = QueueEntryStatus::Active;
                entry.attempts_made += 1;
                entry.lease_expires_at = Some(now + lease_duration(self.lease));
                reserved.push(Delivery {
                    job_id: entry.job_id.clone(),
                    message: entry.message.clone(),
                    attempt: entry.attempts_made,
                });
            }
        }
        Ok(reserved)
    }

    async fn complete(&self, delivery: &Delivery) -> Result<()> {
        self.update(&delivery.job_id, |e| {
            e.status = QueueEntryStatus::Completed;
            e.lease_expires_at = None;
        })
    }

    async fn fail(&self, delivery: &Delivery, error: &str, retry: bool) -> Result<()> {
        let max_attempts = self.policy.max_attempts;
        let delay = chrono::Duration::from_std(self.policy.delay_for(delivery.attempt)).unwrap_or_default();
        self.update(&delivery.job_id, |e| {
            e.last_error = Some(error.to_string());
            e.lease_expires_at = None;
            if retry && e.attempts_made < max_attempts {
                e.status = QueueEntryStatus::Waiting;
                e.run_at = Utc::now() + delay;
            } else {
                e.status = QueueEntryStatus::Failed;
            }
        })
    }

    async fn heartbeat(&self, delivery: &Delivery) -> Result<()> {
        let lease = lease_duration(self.lease);
        self.update(&delivery.job_id, |e| {
            if e.status == QueueEntryStatus::Active {
                e.lease_expires_at = Some(Utc::now() + lease);
            }
        })?;
        self.heartbeats.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

// =============================================================================
// Token Refresher
// =============================================================================

#[derive(Default)]
pub struct MockTokenRefresher {
    responses: Mutex<Vec<std::result::Result<RefreshedTokens, String>>>,
    calls: Mutex<Vec<String>>,
}

impl MockTokenRefresher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_tokens(self, access_token: &str, refresh_token: Option<&str>, expires_in_secs: i64) -> Self {
        self.responses.lock().unwrap().push(Ok(RefreshedTokens {
            access_token: access_token.to_string(),
            refresh_token: refresh_token.map(str::to_string),
            expires_in_secs,
        }));
        self
    }

    pub fn with_error(self, message: &str) -> Self {
        self.responses.lock().unwrap().push(Err(message.to_string()));
        self
    }

    /// Refresh tokens passed in, in call order.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl BaseTokenRefresher for MockTokenRefresher {
    async fn refresh(&self, refresh_token: &str) -> Result<RefreshedTokens> {
        self.calls.lock().unwrap().push(refresh_token.to_string());
        let mut responses = self.responses.lock().unwrap();
        if responses.is_empty() {
            return Err(anyhow!("no refresh response configured"));
        }
        responses.remove(0).map_err(|e| anyhow!(e))
    }
}

// =============================================================================
// Platform API
// =============================================================================

#[derive(Default)]
pub struct MockTikTokApi {
    user_info: Mutex<tiktok_client::UserInfo>,
    videos: Mutex<Vec<tiktok_client::Video>>,
    failure: Mutex<Option<(u16, String)>>,
    tokens: Mutex<Vec<String>>,
    video_requests: Mutex<Vec<usize>>,
}

impl MockTikTokApi {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_user_info(self, info: tiktok_client::UserInfo) -> Self {
        *self.user_info.lock().unwrap() = info;
        self
    }

    pub fn with_videos(self, videos: Vec<tiktok_client::Video>) -> Self {
        *self.videos.lock().unwrap() = videos;
        self
    }

    /// Fail every call with an HTTP error.
    pub fn with_failure(self, status: u16, body: &str) -> Self {
        *self.failure.lock().unwrap() = Some((status, body.to_string()));
        self
    }

    /// Access tokens clients were built with.
    pub fn tokens(&self) -> Vec<String> {
        self.tokens.lock().unwrap().clone()
    }

    pub fn video_requests(&self) -> Vec<usize> {
        self.video_requests.lock().unwrap().clone()
    }

    pub fn factory(api: Arc<MockTikTokApi>) -> TikTokApiFactory {
        Arc::new(move |access_token: &str| -> Arc<dyn BaseTikTokApi> {
            api.tokens.lock().unwrap().push(access_token.to_string());
            api.clone()
        })
    }

    fn check_failure(&self) -> tiktok_client::Result<()> {
        match self.failure.lock().unwrap().clone() {
            Some((status, message)) => Err(tiktok_client::TikTokError::Api { status, message }),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl BaseTikTokApi for MockTikTokApi {
    async fn get_user_info(&self) -> tiktok_client::Result<tiktok_client::UserInfo> {
        self.check_failure()?;
        Ok(self.user_info.lock().unwrap().clone())
    }

    async fn get_user_videos(&self, desired: usize) -> tiktok_client::Result<Vec<tiktok_client::Video>> {
        self.video_requests.lock().unwrap().push(desired);
        self.check_failure()?;
        Ok(self.videos.lock().unwrap().iter().take(desired).cloned().collect())
    }
}

// =============================================================================
// Extraction
// =============================================================================

#[derive(Default)]
pub struct MockHashtagDiscoverer {
    handles: Mutex<Vec<String>>,
    failures_remaining: AtomicUsize,
    calls: Mutex<Vec<(String, usize)>>,
}

impl MockHashtagDiscoverer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_handles(self, handles: &[&str]) -> Self {
        *self.handles.lock().unwrap() = handles.iter().map(|h| h.to_string()).collect();
        self
    }

    /// Fail the next `n` calls with an extraction failure.
    pub fn failing_times(self, n: usize) -> Self {
        self.failures_remaining.store(n, Ordering::SeqCst);
        self
    }

    pub fn calls(&self) -> Vec<(String, usize)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl BaseHashtagDiscoverer for MockHashtagDiscoverer {
    async fn discover(&self, hashtag: &str, desired: usize) -> std::result::Result<Vec<String>, PipelineError> {
        self.calls.lock().unwrap().push((hashtag.to_string(), desired));
        let failing = self
            .failures_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(PipelineError::ExtractionFailure(format!(
                "Anti-bot challenge at https://www.tiktok.com/tag/{}",
                hashtag
            )));
        }
        Ok(self.handles.lock().unwrap().iter().take(desired).cloned().collect())
    }
}

#[derive(Default)]
pub struct MockProfileScraper {
    profiles: Mutex<HashMap<String, ScrapedProfile>>,
    failing: Mutex<HashSet<String>>,
    calls: Mutex<Vec<String>>,
    started: Mutex<Vec<tokio::time::Instant>>,
    delay: Mutex<Option<Duration>>,
}

impl MockProfileScraper {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_profile(self, profile: ScrapedProfile) -> Self {
        self.profiles
            .lock()
            .unwrap()
            .insert(profile.username.to_lowercase(), profile);
        self
    }

    pub fn with_failure(self, handle: &str) -> Self {
        self.failing.lock().unwrap().insert(handle.to_lowercase());
        self
    }

    /// Make each scrape take this long.
    pub fn with_delay(self, delay: Duration) -> Self {
        *self.delay.lock().unwrap() = Some(delay);
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    /// When each scrape started, in call order.
    pub fn started_at(&self) -> Vec<tokio::time::Instant> {
        self.started.lock().unwrap().clone()
    }
}

#[async_trait]
impl BaseProfileScraper for MockProfileScraper {
    async fn scrape_profile(&self, handle: &str) -> std::result::Result<ScrapedProfile, PipelineError> {
        self.calls.lock().unwrap().push(handle.to_string());
        self.started.lock().unwrap().push(tokio::time::Instant::now());
        let delay = *self.delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let key = handle.to_lowercase();
        if self.failing.lock().unwrap().contains(&key) {
            return Err(PipelineError::ExtractionFailure(format!("Profile page has no username: {}", handle)));
        }
        let profile = self.profiles.lock().unwrap().get(&key).cloned();
        Ok(profile.unwrap_or_else(|| ScrapedProfile {
            username: handle.to_string(),
            bio: Some(format!("bio of {}", handle)),
            follower_count: 1_000,
            following_count: 10,
            total_likes: 5_000,
            video_count: 3,
            avatar_url: None,
        }))
    }
}

// =============================================================================
// Browser
// =============================================================================

/// Scripted behaviour of one URL.
#[derive(Debug, Clone, Default)]
pub struct MockPageScript {
    /// HTML after 0, 1, 2... scrolls. The last entry repeats.
    pub steps: Vec<String>,
    /// HTML served by successive reloads. Once used up, reloads keep the current page.
    pub reloads: Vec<String>,
    /// URL reported after navigation (redirects), until the first reload.
    pub landing_url: Option<String>,
}

impl MockPageScript {
    pub fn static_page(html: &str) -> Self {
        Self {
            steps: vec![html.to_string()],
            ..Default::default()
        }
    }
}

#[derive(Default)]
struct MockBrowserState {
    scripts: Mutex<HashMap<String, MockPageScript>>,
    opened: Mutex<Vec<ContextOptions>>,
    visited: Mutex<Vec<String>>,
    set_cookies: Mutex<Vec<Cookie>>,
    pages_closed: AtomicUsize,
    browser_closed: AtomicBool,
}

#[derive(Clone, Default)]
pub struct MockBrowser {
    state: Arc<MockBrowserState>,
}

impl MockBrowser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_page(self, url: &str, script: MockPageScript) -> Self {
        self.state.scripts.lock().unwrap().insert(url.to_string(), script);
        self
    }

    /// Cookies every page adds to its jar once loaded.
    pub fn with_set_cookies(self, cookies: Vec<Cookie>) -> Self {
        *self.state.set_cookies.lock().unwrap() = cookies;
        self
    }

    pub fn opened_contexts(&self) -> Vec<ContextOptions> {
        self.state.opened.lock().unwrap().clone()
    }

    pub fn visited(&self) -> Vec<String> {
        self.state.visited.lock().unwrap().clone()
    }

    pub fn pages_closed(&self) -> usize {
        self.state.pages_closed.load(Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.state.browser_closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BaseBrowser for MockBrowser {
    async fn new_page(&self, options: ContextOptions) -> Result<Box<dyn BasePage>> {
        self.state.opened.lock().unwrap().push(options.clone());
        Ok(Box::new(MockPage {
            state: self.state.clone(),
            script: MockPageScript::default(),
            cookies: options.cookies,
            requested_url: String::new(),
            url: String::new(),
            html: None,
            scroll: 0,
            reloads_used: 0,
        }))
    }

    async fn close(&self) -> Result<()> {
        self.state.browser_closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

pub struct MockPage {
    state: Arc<MockBrowserState>,
    script: MockPageScript,
    cookies: Vec<Cookie>,
    requested_url: String,
    url: String,
    html: Option<String>,
    scroll: usize,
    reloads_used: usize,
}

impl MockPage {
    fn step_html(&self) -> Option<String> {
        let steps = &self.script.steps;
        if steps.is_empty() {
            return None;
        }
        Some(steps[self.scroll.min(steps.len() - 1)].clone())
    }

    fn merge_set_cookies(&mut self) {
        for cookie in self.state.set_cookies.lock().unwrap().iter() {
            self.cookies.retain(|c| c.name != cookie.name);
            self.cookies.push(cookie.clone());
        }
    }
}

#[async_trait]
impl BasePage for MockPage {
    async fn goto(&mut self, url: &str, _timeout: Duration) -> Result<()> {
        self.state.visited.lock().unwrap().push(url.to_string());
        let script = self
            .state
            .scripts
            .lock()
            .unwrap()
            .get(url)
            .cloned()
            .ok_or_else(|| anyhow!("net::ERR_NAME_NOT_RESOLVED at {}", url))?;
        self.script = script;
        self.requested_url = url.to_string();
        self.url = self.script.landing_url.clone().unwrap_or_else(|| url.to_string());
        self.scroll = 0;
        self.reloads_used = 0;
        self.html = self.step_html();
        self.merge_set_cookies();
        Ok(())
    }

    async fn reload(&mut self, _timeout: Duration) -> Result<()> {
        if self.reloads_used < self.script.reloads.len() {
            self.html = Some(self.script.reloads[self.reloads_used].clone());
            self.reloads_used += 1;
            self.url = self.requested_url.clone();
        }
        Ok(())
    }

    async fn scroll(&mut self) -> Result<()> {
        self.scroll += 1;
        self.html = self.step_html();
        Ok(())
    }

    async fn content(&self) -> Result<String> {
        self.html.clone().ok_or_else(|| anyhow!("page not loaded"))
    }

    fn url(&self) -> String {
        self.url.clone()
    }

    async fn cookies(&self) -> Result<Vec<Cookie>> {
        Ok(self.cookies.clone())
    }

    async fn close(&mut self) -> Result<()> {
        self.state.pages_closed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

// =============================================================================
// Health
// =============================================================================

pub struct MockDatabaseProbe {
    healthy: AtomicBool,
}

impl Default for MockDatabaseProbe {
    fn default() -> Self {
        Self {
            healthy: AtomicBool::new(true),
        }
    }
}

impl MockDatabaseProbe {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_healthy(&self, healthy: bool) {
        self.healthy.store(healthy, Ordering::SeqCst);
    }
}

#[async_trait]
impl BaseDatabaseProbe for MockDatabaseProbe {
    async fn ping(&self) -> Result<()> {
        if self.healthy.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(anyhow!("connection refused"))
        }
    }
}

// =============================================================================
// TestDependencies - Builder for test dependencies
// =============================================================================

#[derive(Clone)]
pub struct TestDependencies {
    pub discovery_store: Arc<InMemoryDiscoveryStore>,
    pub discovery_queue: Arc<InMemoryDiscoveryQueue>,
    pub creator_store: Arc<InMemoryCreatorStore>,
    pub credential_store: Arc<InMemoryCredentialStore>,
    pub video_store: Arc<InMemoryVideoStore>,
    pub token_refresher: Arc<MockTokenRefresher>,
    pub tiktok_api: Arc<MockTikTokApi>,
    pub discoverer: Arc<MockHashtagDiscoverer>,
    pub profile_scraper: Arc<MockProfileScraper>,
    pub database: Arc<MockDatabaseProbe>,
    pub cipher: TokenCipher,
    pub discovery: DiscoveryConfig,
    pub refresh_skew: Duration,
    pub rate_limit: Duration,
}

impl TestDependencies {
    pub fn new() -> Self {
        let discovery = DiscoveryConfig {
            backoff_base: Duration::ZERO,
            ..DiscoveryConfig::default()
        };
        Self {
            discovery_store: Arc::new(InMemoryDiscoveryStore::new()),
            discovery_queue: Arc::new(
                InMemoryDiscoveryQueue::new(RetryPolicy {
                    max_attempts: discovery.max_attempts,
                    backoff_base: discovery.backoff_base,
                })
                .with_lease(discovery.lease),
            ),
            creator_store: Arc::new(InMemoryCreatorStore::new()),
            credential_store: Arc::new(InMemoryCredentialStore::new()),
            video_store: Arc::new(InMemoryVideoStore::new()),
            token_refresher: Arc::new(MockTokenRefresher::new()),
            tiktok_api: Arc::new(MockTikTokApi::new()),
            discoverer: Arc::new(MockHashtagDiscoverer::new()),
            profile_scraper: Arc::new(MockProfileScraper::new()),
            database: Arc::new(MockDatabaseProbe::new()),
            cipher: TokenCipher::from_hex(TEST_ENCRYPTION_KEY).unwrap(),
            discovery,
            refresh_skew: Duration::from_secs(300),
            rate_limit: Duration::ZERO,
        }
    }

    pub fn mock_discoverer(mut self, discoverer: MockHashtagDiscoverer) -> Self {
        self.discoverer = Arc::new(discoverer);
        self
    }

    pub fn mock_scraper(mut self, scraper: MockProfileScraper) -> Self {
        self.profile_scraper = Arc::new(scraper);
        self
    }

    pub fn mock_api(mut self, api: MockTikTokApi) -> Self {
        self.tiktok_api = Arc::new(api);
        self
    }

    pub fn mock_refresher(mut self, refresher: MockTokenRefresher) -> Self {
        self.token_refresher = Arc::new(refresher);
        self
    }

    pub fn creators(mut self, store: InMemoryCreatorStore) -> Self {
        self.creator_store = Arc::new(store);
        self
    }

    pub fn queue(mut self, queue: InMemoryDiscoveryQueue) -> Self {
        self.discovery_queue = Arc::new(queue);
        self
    }

    pub fn discovery_config(mut self, discovery: DiscoveryConfig) -> Self {
        self.discovery = discovery;
        self
    }

    pub fn rate_limit(mut self, rate_limit: Duration) -> Self {
        self.rate_limit = rate_limit;
        self
    }

    pub fn token_manager(&self) -> Arc<TokenManager> {
        Arc::new(TokenManager::new(
            self.credential_store.clone(),
            self.token_refresher.clone(),
            self.cipher.clone(),
            self.refresh_skew,
        ))
    }

    pub fn sync_service(&self) -> Arc<SyncService> {
        Arc::new(SyncService::new(
            self.token_manager(),
            self.video_store.clone(),
            MockTikTokApi::factory(self.tiktok_api.clone()),
        ))
    }

    pub fn server_deps(&self) -> ServerDeps {
        ServerDeps::new(
            self.discovery_store.clone(),
            self.discovery_queue.clone(),
            self.sync_service(),
            self.database.clone(),
            self.discovery.clone(),
        )
    }

    pub fn worker_deps(&self) -> WorkerDeps {
        WorkerDeps {
            discovery_store: self.discovery_store.clone(),
            discovery_queue: self.discovery_queue.clone(),
            creator_store: self.creator_store.clone(),
            discoverer: self.discoverer.clone(),
            profile_scraper: self.profile_scraper.clone(),
            discovery: self.discovery.clone(),
            rate_limit: self.rate_limit,
            sessions: None,
        }
    }
}

impl Default for TestDependencies {
    fn default() -> Self {
        Self::new()
    }
}
