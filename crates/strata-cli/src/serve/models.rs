//! API request and response types.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};

use strata_core::{ChunkOutcome, ChunkRequest, CommitMode, CommitSummary, PipelineError, VerificationReport};

// =============================================================================
// Requests
// =============================================================================

/// Body of `POST /api/scan/{id}/interpret`.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct InterpretBody {
    #[serde(flatten)]
    pub chunk: ChunkRequest,
    /// Follow the cursor to the end instead of stopping after one chunk.
    pub all: bool,
}

/// Body of `POST /api/scan/{id}/commit`.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct CommitBody {
    pub mode: CommitMode,
    /// Skip verification after the commit.
    pub skip_verify: bool,
}

// =============================================================================
// Responses
// =============================================================================

#[derive(Debug, Serialize)]
pub struct InterpretResponse {
    pub session_id: String,
    #[serde(flatten)]
    pub outcome: ChunkOutcome,
}

#[derive(Debug, Serialize)]
pub struct CommitResponse {
    pub commit: CommitSummary,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verification: Option<VerificationReport>,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

// =============================================================================
// Errors
// =============================================================================

/// A pipeline error on its way to an HTTP response.
#[derive(Debug)]
pub struct ApiError(pub PipelineError);

impl From<PipelineError> for ApiError {
    fn from(err: PipelineError) -> Self {
        Self(err)
    }
}

/// 404 unknown session, 409 state conflict, 400 bad filter, 503 graph
/// unavailable, 500 otherwise.
pub fn status_for(err: &PipelineError) -> StatusCode {
    if err.is_not_found() {
        StatusCode::NOT_FOUND
    } else if err.is_conflict() {
        StatusCode::CONFLICT
    } else if err.is_invalid_request() {
        StatusCode::BAD_REQUEST
    } else if err.is_unavailable() {
        StatusCode::SERVICE_UNAVAILABLE
    } else {
        StatusCode::INTERNAL_SERVER_ERROR
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = status_for(&self.0);
        if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!("Request failed: {}", self.0);
        }
        let body = ErrorBody {
            error: self.0.to_string(),
        };
        (status, Json(body)).into_response()
    }
}
