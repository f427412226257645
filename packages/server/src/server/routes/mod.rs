// HTTP routes
pub mod discovery;
pub mod health;
pub mod sync;

pub use discovery::*;
pub use health::*;
pub use sync::*;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

use crate::common::PipelineError;

/// Error body shared by the JSON endpoints.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorBody {
    pub success: bool,
    pub error: String,
    pub error_code: &'static str,
}

impl IntoResponse for PipelineError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!(error = %self, "Request failed");
        }
        let body = ErrorBody {
            success: false,
            error: self.to_string(),
            error_code: self.code(),
        };
        (status, Json(body)).into_response()
    }
}
