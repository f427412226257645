//! Pure TikTok open API client.
//!
//! Covers the calls the sync pipeline needs: profile info, the paginated
//! video list, and OAuth access-token refresh.
//!
//! # Example
//!
//! ```rust,ignore
//! use tiktok_client::TikTokClient;
//!
//! let client = TikTokClient::new("access-token".into());
//! let info = client.get_user_info().await?;
//! let videos = client.get_user_videos(100).await?;
//! ```

pub mod error;
pub mod oauth;
pub mod types;

pub use error::{Result, TikTokError};
pub use oauth::TikTokOAuth;
pub use types::{TokenResponse, UserInfo, Video};

use std::time::Duration;

use serde::de::DeserializeOwned;
use types::{ApiEnvelope, UserInfoData, VideoListData, VideoListRequest, USER_INFO_FIELDS, VIDEO_FIELDS};

pub const DEFAULT_BASE_URL: &str = "https://open.tiktokapis.com/v2";

/// Largest page the video list endpoint accepts.
pub const MAX_PAGE_SIZE: usize = 20;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

pub struct TikTokClient {
    client: reqwest::Client,
    base_url: String,
    access_token: String,
    timeout: Duration,
}

impl TikTokClient {
    pub fn new(access_token: String) -> Self {
        Self::with_base_url(DEFAULT_BASE_URL, access_token)
    }

    pub fn with_base_url(base_url: &str, access_token: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            access_token,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Fetch the authenticated user's profile.
    pub async fn get_user_info(&self) -> Result<UserInfo> {
        let url = format!("{}/user/info/", self.base_url);
        let resp = self
            .client
            .get(&url)
            .bearer_auth(&self.access_token)
            .query(&[("fields", USER_INFO_FIELDS)])
            .timeout(self.timeout)
            .send()
            .await?;

        let data: UserInfoData = Self::read_envelope(resp).await?;
        Ok(data.user)
    }

    /// Fetch up to `desired` videos, following the cursor page by page.
    ///
    /// Stops early when the platform reports no more pages. Any failed page
    /// aborts the whole call; partial results are discarded.
    pub async fn get_user_videos(&self, desired: usize) -> Result<Vec<Video>> {
        let url = format!("{}/video/list/", self.base_url);
        let mut collected: Vec<Video> = Vec::new();
        let mut cursor: Option<serde_json::Value> = None;

        while collected.len() < desired {
            let remaining = desired - collected.len();
            let body = VideoListRequest {
                max_count: remaining.clamp(1, MAX_PAGE_SIZE) as u32,
                cursor: cursor.take(),
            };

            let resp = self
                .client
                .post(&url)
                .bearer_auth(&self.access_token)
                .query(&[("fields", VIDEO_FIELDS)])
                .json(&body)
                .timeout(self.timeout)
                .send()
                .await?;

            let page: VideoListData = Self::read_envelope(resp).await?;
            tracing::debug!(
                received = page.videos.len(),
                has_more = page.has_more,
                "Fetched video page"
            );

            let next = page.next_cursor();
            collected.extend(page.videos);

            match next {
                Some(c) => cursor = Some(c),
                None => break,
            }
        }

        Ok(collected)
    }

    async fn read_envelope<T: DeserializeOwned>(resp: reqwest::Response) -> Result<T> {
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(TikTokError::Api {
                status: status.as_u16(),
                message: body,
            });
        }

        let envelope: ApiEnvelope<T> = resp.json().await?;
        if let Some(err) = envelope.error.as_ref().filter(|e| !e.is_ok()) {
            return Err(TikTokError::Api {
                status: status.as_u16(),
                message: format!("{}: {}", err.code, err.message),
            });
        }

        envelope
            .data
            .ok_or_else(|| TikTokError::Decode("response has no data".into()))
    }
}
