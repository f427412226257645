use axum::{
    extract::{rejection::JsonRejection, State},
    Json,
};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::common::{PipelineError, UserId};
use crate::domains::sync::SyncResult;
use crate::server::app::AppState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncRequest {
    #[serde(default)]
    pub user_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct SyncResponse {
    pub success: bool,
    pub data: SyncResult,
}

/// `POST /api/sync` - pull the user's profile and recent videos.
pub async fn sync_handler(
    State(state): State<AppState>,
    body: Result<Json<SyncRequest>, JsonRejection>,
) -> Result<Json<SyncResponse>, PipelineError> {
    let Json(request) = body.map_err(|e| PipelineError::Validation(e.body_text()))?;
    let raw = request
        .user_id
        .filter(|id| !id.trim().is_empty())
        .ok_or_else(|| PipelineError::Validation("userId is required".to_string()))?;
    let user_id = UserId::parse(raw.trim())
        .map_err(|_| PipelineError::Validation(format!("userId is not a valid id: {}", raw)))?;

    let data = state.deps.sync_service.sync_user_data(user_id).await?;
    info!(user_id = %user_id, videos = data.videos_count, "Sync request finished");

    Ok(Json(SyncResponse { success: true, data }))
}
