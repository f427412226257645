use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    Json,
};
use serde::Serialize;

use crate::common::{DiscoveryJobId, PipelineError};
use crate::domains::discovery::{enqueue_discovery, EnqueueDiscoveryInput};
use crate::server::app::AppState;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscoveryAccepted {
    pub success: bool,
    pub job_id: String,
    pub discovery_id: DiscoveryJobId,
    pub hashtag: String,
}

/// `POST /api/discovery` - record a discovery request and queue it for a worker.
pub async fn discovery_handler(
    State(state): State<AppState>,
    body: Result<Json<EnqueueDiscoveryInput>, JsonRejection>,
) -> Result<(StatusCode, Json<DiscoveryAccepted>), PipelineError> {
    let Json(input) = body.map_err(|e| PipelineError::Validation(e.body_text()))?;
    let result = enqueue_discovery(input, &state.deps).await?;

    Ok((
        StatusCode::ACCEPTED,
        Json(DiscoveryAccepted {
            success: true,
            job_id: result.job_id,
            discovery_id: result.discovery_id,
            hashtag: result.hashtag,
        }),
    ))
}
