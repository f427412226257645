// Trait definitions for dependency injection
//
// These are INFRASTRUCTURE traits only - stores, remote APIs and extractors.
// Pipeline logic (token lifecycle, sync, discovery processing) lives in the
// domains and is written against these traits.
//
// Naming convention: Base* for trait names (e.g., BaseDiscoveryStore)

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::common::{DiscoveryJobId, PipelineError, UserId};
use crate::domains::creators::CreatorProfile;
use crate::domains::credentials::Credential;
use crate::domains::discovery::models::{DiscoveryJob, DiscoveryPayload, DiscoveryStatus, NewDiscoveryJob, QueueLink};
use crate::domains::scraping::ScrapedProfile;

// =============================================================================
// Discovery Record Store
// =============================================================================

#[async_trait]
pub trait BaseDiscoveryStore: Send + Sync {
    async fn create(&self, new: NewDiscoveryJob) -> Result<DiscoveryJob>;

    async fn find(&self, id: DiscoveryJobId) -> Result<Option<DiscoveryJob>>;

    /// Set only the payload's `queue` key.
    async fn link_queue(&self, id: DiscoveryJobId, link: &QueueLink) -> Result<()>;

    /// Replace the payload and re-arm to pending unless currently processing.
    /// Completed and failed records start a new run: `attempt_base` moves up
    /// to `attempts`, which itself is never reset.
    async fn rearm(&self, id: DiscoveryJobId, payload: &DiscoveryPayload) -> Result<Option<DiscoveryJob>>;

    /// pending (or processing with an expired lease) -> processing, bumping
    /// attempts and taking a lease. `None` otherwise.
    async fn mark_processing(&self, id: DiscoveryJobId, lease: Duration) -> Result<Option<DiscoveryJob>>;

    /// Claim the oldest pending record whose run has made fewer than
    /// `max_attempts` attempts, or a processing record whose lease expired.
    async fn claim_next_pending(&self, max_attempts: i32, lease: Duration) -> Result<Option<DiscoveryJob>>;

    /// Renew the lease on a processing record.
    async fn extend_lease(&self, id: DiscoveryJobId, lease: Duration) -> Result<()>;

    /// processing -> `status`. Returns false if the record was not processing.
    async fn finish(&self, id: DiscoveryJobId, status: DiscoveryStatus, payload: &DiscoveryPayload) -> Result<bool>;
}

// =============================================================================
// Creator Store
// =============================================================================

#[async_trait]
pub trait BaseCreatorStore: Send + Sync {
    /// Case-insensitive handle lookup.
    async fn exists_by_handle(&self, handle: &str) -> Result<bool>;

    async fn upsert(&self, profile: &ScrapedProfile, source: &str) -> Result<CreatorProfile>;
}

// =============================================================================
// Credential Store + Token Refresh
// =============================================================================

#[async_trait]
pub trait BaseCredentialStore: Send + Sync {
    async fn find_credential(&self, user_id: UserId) -> Result<Option<Credential>>;

    /// `refresh_token_encrypted = None` keeps the stored refresh token.
    async fn save_tokens(
        &self,
        user_id: UserId,
        access_token_encrypted: &str,
        refresh_token_encrypted: Option<&str>,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<()>;
}

/// Plaintext tokens returned by the OAuth refresh endpoint.
#[derive(Debug, Clone)]
pub struct RefreshedTokens {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_in_secs: i64,
}

#[async_trait]
pub trait BaseTokenRefresher: Send + Sync {
    async fn refresh(&self, refresh_token: &str) -> Result<RefreshedTokens>;
}

// =============================================================================
// Platform API (sync)
// =============================================================================

#[async_trait]
pub trait BaseTikTokApi: Send + Sync {
    async fn get_user_info(&self) -> tiktok_client::Result<tiktok_client::UserInfo>;

    async fn get_user_videos(&self, desired: usize) -> tiktok_client::Result<Vec<tiktok_client::Video>>;
}

/// Builds an API client bound to one access token.
pub type TikTokApiFactory = Arc<dyn Fn(&str) -> Arc<dyn BaseTikTokApi> + Send + Sync>;

#[async_trait]
pub trait BaseVideoStore: Send + Sync {
    async fn update_user_profile(&self, user_id: UserId, info: &tiktok_client::UserInfo) -> Result<()>;

    /// Upsert keyed by platform video id; returns how many were written.
    async fn upsert_videos(&self, user_id: UserId, videos: &[tiktok_client::Video]) -> Result<usize>;
}

// =============================================================================
// Extraction
// =============================================================================

#[async_trait]
pub trait BaseHashtagDiscoverer: Send + Sync {
    /// Handles in discovery order, at most `desired` of them.
    async fn discover(&self, hashtag: &str, desired: usize) -> Result<Vec<String>, PipelineError>;
}

#[async_trait]
pub trait BaseProfileScraper: Send + Sync {
    async fn scrape_profile(&self, handle: &str) -> Result<ScrapedProfile, PipelineError>;
}

// =============================================================================
// Health
// =============================================================================

#[async_trait]
pub trait BaseDatabaseProbe: Send + Sync {
    /// Cheap round-trip to the database.
    async fn ping(&self) -> Result<()>;
}
