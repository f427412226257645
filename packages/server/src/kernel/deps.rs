//! Dependency containers for the HTTP server and the discovery worker.
//!
//! Everything a handler or worker touches is reached through a `Base*`
//! trait so tests can swap in the doubles from `test_dependencies`.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use tiktok_client::{TikTokClient, TikTokOAuth};

use crate::common::{DiscoveryJobId, UserId};
use crate::config::{Config, DiscoveryConfig};
use crate::domains::creators::CreatorProfile;
use crate::domains::credentials::{Credential, TokenManager};
use crate::domains::discovery::models::{DiscoveryJob, DiscoveryPayload, DiscoveryStatus, NewDiscoveryJob, QueueLink};
use crate::domains::scraping::{HashtagDiscoverer, ProfileScraper, ScrapedProfile, StealthSessionManager};
use crate::domains::sync::{SyncService, UserProfile, VideoRecord, VideoUpsert};
use crate::kernel::browser::BrowserlessBrowser;
use crate::kernel::jobs::{BaseDiscoveryQueue, PostgresDiscoveryQueue, RetryPolicy};
use crate::kernel::nats::NatsPublisher;
use crate::kernel::{
    BaseCreatorStore, BaseCredentialStore, BaseDatabaseProbe, BaseDiscoveryStore, BaseHashtagDiscoverer,
    BaseProfileScraper, BaseTikTokApi, BaseTokenRefresher, BaseVideoStore, RefreshedTokens, TikTokApiFactory,
};

// =============================================================================
// Postgres stores (delegate to the domain models)
// =============================================================================

pub struct PgDiscoveryStore(pub PgPool);

#[async_trait]
impl BaseDiscoveryStore for PgDiscoveryStore {
    async fn create(&self, new: NewDiscoveryJob) -> Result<DiscoveryJob> {
        DiscoveryJob::insert(&new, &self.0).await
    }

    async fn find(&self, id: DiscoveryJobId) -> Result<Option<DiscoveryJob>> {
        DiscoveryJob::find_by_id(id, &self.0).await
    }

    async fn link_queue(&self, id: DiscoveryJobId, link: &QueueLink) -> Result<()> {
        DiscoveryJob::link_queue(id, link, &self.0).await
    }

    async fn rearm(&self, id: DiscoveryJobId, payload: &DiscoveryPayload) -> Result<Option<DiscoveryJob>> {
        DiscoveryJob::rearm(id, payload, &self.0).await
    }

    async fn mark_processing(&self, id: DiscoveryJobId, lease: Duration) -> Result<Option<DiscoveryJob>> {
        DiscoveryJob::mark_processing(id, lease, &self.0).await
    }

    async fn claim_next_pending(&self, max_attempts: i32, lease: Duration) -> Result<Option<DiscoveryJob>> {
        DiscoveryJob::claim_next_pending(max_attempts, lease, &self.0).await
    }

    async fn extend_lease(&self, id: DiscoveryJobId, lease: Duration) -> Result<()> {
        DiscoveryJob::extend_lease(id, lease, &self.0).await
    }

    async fn finish(&self, id: DiscoveryJobId, status: DiscoveryStatus, payload: &DiscoveryPayload) -> Result<bool> {
        DiscoveryJob::finish(id, status, payload, &self.0).await
    }
}

pub struct PgCreatorStore(pub PgPool);

#[async_trait]
impl BaseCreatorStore for PgCreatorStore {
    async fn exists_by_handle(&self, handle: &str) -> Result<bool> {
        CreatorProfile::exists_by_handle(handle, &self.0).await
    }

    async fn upsert(&self, profile: &ScrapedProfile, source: &str) -> Result<CreatorProfile> {
        CreatorProfile::upsert(profile, source, &self.0).await
    }
}

pub struct PgCredentialStore(pub PgPool);

#[async_trait]
impl BaseCredentialStore for PgCredentialStore {
    async fn find_credential(&self, user_id: UserId) -> Result<Option<Credential>> {
        Credential::find_by_user(user_id, &self.0).await
    }

    async fn save_tokens(
        &self,
        user_id: UserId,
        access_token_encrypted: &str,
        refresh_token_encrypted: Option<&str>,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<()> {
        Credential::store_tokens(user_id, access_token_encrypted, refresh_token_encrypted, expires_at, &self.0).await
    }
}

pub struct PgVideoStore(pub PgPool);

#[async_trait]
impl BaseVideoStore for PgVideoStore {
    async fn update_user_profile(&self, user_id: UserId, info: &tiktok_client::UserInfo) -> Result<()> {
        UserProfile::update_from_info(user_id, info, &self.0).await
    }

    async fn upsert_videos(&self, user_id: UserId, videos: &[tiktok_client::Video]) -> Result<usize> {
        for video in videos {
            VideoRecord::upsert(user_id, &VideoUpsert::from(video), &self.0).await?;
        }
        Ok(videos.len())
    }
}

pub struct PgDatabaseProbe(pub PgPool);

#[async_trait]
impl BaseDatabaseProbe for PgDatabaseProbe {
    async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.0).await?;
        Ok(())
    }
}

// =============================================================================
// Platform adapters
// =============================================================================

/// Wrapper around TikTokOAuth that implements BaseTokenRefresher
pub struct TikTokRefresher(pub TikTokOAuth);

#[async_trait]
impl BaseTokenRefresher for TikTokRefresher {
    async fn refresh(&self, refresh_token: &str) -> Result<RefreshedTokens> {
        let tokens = self
            .0
            .refresh(refresh_token)
            .await
            .map_err(|e| anyhow::anyhow!("{}", e))?;
        Ok(RefreshedTokens {
            access_token: tokens.access_token,
            refresh_token: tokens.refresh_token,
            expires_in_secs: tokens.expires_in,
        })
    }
}

/// Wrapper around TikTokClient that implements BaseTikTokApi
pub struct TikTokApiAdapter(pub TikTokClient);

#[async_trait]
impl BaseTikTokApi for TikTokApiAdapter {
    async fn get_user_info(&self) -> tiktok_client::Result<tiktok_client::UserInfo> {
        self.0.get_user_info().await
    }

    async fn get_user_videos(&self, desired: usize) -> tiktok_client::Result<Vec<tiktok_client::Video>> {
        self.0.get_user_videos(desired).await
    }
}

/// Factory producing a fresh API client per access token.
pub fn tiktok_api_factory(base_url: String) -> TikTokApiFactory {
    Arc::new(move |access_token: &str| -> Arc<dyn BaseTikTokApi> {
        Arc::new(TikTokApiAdapter(TikTokClient::with_base_url(
            &base_url,
            access_token.to_string(),
        )))
    })
}

// =============================================================================
// ServerDeps
// =============================================================================

/// Dependencies behind the HTTP front door.
#[derive(Clone)]
pub struct ServerDeps {
    pub discovery_store: Arc<dyn BaseDiscoveryStore>,
    pub discovery_queue: Arc<dyn BaseDiscoveryQueue>,
    pub sync_service: Arc<SyncService>,
    pub database: Arc<dyn BaseDatabaseProbe>,
    pub discovery: DiscoveryConfig,
}

impl ServerDeps {
    pub fn new(
        discovery_store: Arc<dyn BaseDiscoveryStore>,
        discovery_queue: Arc<dyn BaseDiscoveryQueue>,
        sync_service: Arc<SyncService>,
        database: Arc<dyn BaseDatabaseProbe>,
        discovery: DiscoveryConfig,
    ) -> Self {
        Self {
            discovery_store,
            discovery_queue,
            sync_service,
            database,
            discovery,
        }
    }

    /// Production wiring over one pool.
    pub fn from_pool(pool: PgPool, config: &Config, nats: Option<Arc<dyn NatsPublisher>>) -> Self {
        let refresher = TikTokRefresher(
            TikTokOAuth::new(config.tiktok.client_key.clone(), config.tiktok.client_secret.clone())
                .with_token_url(&config.tiktok.token_url),
        );
        let tokens = Arc::new(TokenManager::new(
            Arc::new(PgCredentialStore(pool.clone())),
            Arc::new(refresher),
            config.cipher.clone(),
            config.tiktok.refresh_skew,
        ));
        let sync_service = Arc::new(SyncService::new(
            tokens,
            Arc::new(PgVideoStore(pool.clone())),
            tiktok_api_factory(config.tiktok.api_base_url.clone()),
        ));

        Self::new(
            Arc::new(PgDiscoveryStore(pool.clone())),
            discovery_queue(pool.clone(), &config.discovery, nats),
            sync_service,
            Arc::new(PgDatabaseProbe(pool)),
            config.discovery.clone(),
        )
    }
}

fn discovery_queue(
    pool: PgPool,
    discovery: &DiscoveryConfig,
    nats: Option<Arc<dyn NatsPublisher>>,
) -> Arc<dyn BaseDiscoveryQueue> {
    let policy = RetryPolicy {
        max_attempts: discovery.max_attempts,
        backoff_base: discovery.backoff_base,
    };
    let queue = PostgresDiscoveryQueue::new(pool, policy).with_lease(discovery.lease);
    match nats {
        Some(nats) => Arc::new(queue.with_nats(nats)),
        None => Arc::new(queue),
    }
}

// =============================================================================
// WorkerDeps
// =============================================================================

/// Dependencies of a discovery worker process.
#[derive(Clone)]
pub struct WorkerDeps {
    pub discovery_store: Arc<dyn BaseDiscoveryStore>,
    pub discovery_queue: Arc<dyn BaseDiscoveryQueue>,
    pub creator_store: Arc<dyn BaseCreatorStore>,
    pub discoverer: Arc<dyn BaseHashtagDiscoverer>,
    pub profile_scraper: Arc<dyn BaseProfileScraper>,
    pub discovery: DiscoveryConfig,
    /// Minimum gap between consecutive profile scrapes.
    pub rate_limit: Duration,
    /// Present when a real browser backs extraction; closed on shutdown.
    pub sessions: Option<Arc<StealthSessionManager>>,
}

impl WorkerDeps {
    pub fn from_pool(pool: PgPool, config: &Config, nats: Option<Arc<dyn NatsPublisher>>) -> Self {
        let browser = Arc::new(BrowserlessBrowser::new(
            &config.scraper.browserless_url,
            config.scraper.browserless_token.as_deref(),
        ));
        let sessions = Arc::new(StealthSessionManager::new(browser, config.scraper.clone()));

        Self {
            discovery_store: Arc::new(PgDiscoveryStore(pool.clone())),
            discovery_queue: discovery_queue(pool.clone(), &config.discovery, nats),
            creator_store: Arc::new(PgCreatorStore(pool)),
            discoverer: Arc::new(HashtagDiscoverer::new(sessions.clone())),
            profile_scraper: Arc::new(ProfileScraper::new(sessions.clone())),
            discovery: config.discovery.clone(),
            rate_limit: config.scraper.rate_limit,
            sessions: Some(sessions),
        }
    }

    /// Release the browser.
    pub async fn shutdown(&self) {
        if let Some(sessions) = &self.sessions {
            sessions.shutdown().await;
        }
    }
}
