use std::sync::Arc;

use serde::Serialize;
use tracing::info;

use crate::common::{PipelineError, UserId};
use crate::domains::credentials::TokenManager;
use crate::kernel::{BaseVideoStore, TikTokApiFactory};

/// Videos requested per sync.
pub const SYNC_VIDEO_COUNT: usize = 100;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncResult {
    pub user_info: tiktok_client::UserInfo,
    pub videos_count: usize,
}

/// Pulls a user's profile and recent videos from the platform and stores them.
pub struct SyncService {
    tokens: Arc<TokenManager>,
    videos: Arc<dyn BaseVideoStore>,
    api_factory: TikTokApiFactory,
}

impl SyncService {
    pub fn new(tokens: Arc<TokenManager>, videos: Arc<dyn BaseVideoStore>, api_factory: TikTokApiFactory) -> Self {
        Self {
            tokens,
            videos,
            api_factory,
        }
    }

    pub async fn sync_user_data(&self, user_id: UserId) -> Result<SyncResult, PipelineError> {
        let access_token = self.tokens.get_valid_access_token(user_id).await?;
        let api = (self.api_factory)(&access_token);

        let user_info = api.get_user_info().await?;
        self.videos.update_user_profile(user_id, &user_info).await?;

        let videos = api.get_user_videos(SYNC_VIDEO_COUNT).await?;
        let videos_count = self.videos.upsert_videos(user_id, &videos).await?;

        info!(user_id = %user_id, videos_count, "User data synced");

        Ok(SyncResult {
            user_info,
            videos_count,
        })
    }
}
