use axum::http::StatusCode;
use thiserror::Error;

/// Failure taxonomy shared by the sync service, the discovery pipeline and
/// the HTTP front door.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("User not authenticated: {0}")]
    UserNotAuthenticated(String),

    #[error("Token expired: {0}")]
    TokenExpired(String),

    #[error("Stored token could not be decrypted: {0}")]
    TokenInvalid(String),

    #[error("Remote API error (status {status}): {body}")]
    RemoteApi { status: u16, body: String },

    #[error("Extraction failed: {0}")]
    ExtractionFailure(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Integrity check failed: {0}")]
    Integrity(#[from] crate::common::crypto::IntegrityError),

    #[error("Queue error: {0}")]
    Queue(String),

    #[error("Interrupted by shutdown")]
    Interrupted,

    #[error("Attempt budget of {0} exhausted")]
    AttemptsExhausted(i32),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl PipelineError {
    /// Machine-readable code returned to API clients.
    pub fn code(&self) -> &'static str {
        match self {
            PipelineError::UserNotAuthenticated(_) => "USER_NOT_AUTHENTICATED",
            PipelineError::TokenExpired(_) => "TOKEN_EXPIRED",
            PipelineError::TokenInvalid(_) => "TOKEN_INVALID",
            PipelineError::RemoteApi { .. } => "API_ERROR",
            PipelineError::ExtractionFailure(_) => "EXTRACTION_FAILURE",
            PipelineError::Validation(_) => "VALIDATION_ERROR",
            PipelineError::Integrity(_) => "INTEGRITY_ERROR",
            PipelineError::Queue(_) => "QUEUE_ERROR",
            PipelineError::Interrupted => "INTERRUPTED",
            PipelineError::AttemptsExhausted(_) => "ATTEMPTS_EXHAUSTED",
            PipelineError::Database(_) | PipelineError::Internal(_) => "UNKNOWN",
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            PipelineError::Validation(_) => StatusCode::BAD_REQUEST,
            PipelineError::UserNotAuthenticated(_)
            | PipelineError::TokenExpired(_)
            | PipelineError::TokenInvalid(_) => StatusCode::UNAUTHORIZED,
            PipelineError::RemoteApi { .. } => StatusCode::BAD_GATEWAY,
            PipelineError::Queue(_) => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<tiktok_client::TikTokError> for PipelineError {
    fn from(err: tiktok_client::TikTokError) -> Self {
        match err {
            tiktok_client::TikTokError::Api { status, message } => PipelineError::RemoteApi {
                status,
                body: message,
            },
            other => PipelineError::RemoteApi {
                status: 0,
                body: other.to_string(),
            },
        }
    }
}
