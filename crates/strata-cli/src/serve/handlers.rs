//! HTTP route handlers.
//!
//! Handlers are kept thin; the pipeline does the work.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::Json;
use serde::{Deserialize, Serialize};

use strata_core::{ScanReport, ScanRequest, ScanSession, SessionReport};

use super::models::{ApiError, CommitBody, CommitResponse, InterpretBody, InterpretResponse};
use super::AppState;

type ApiResult<T> = Result<Json<T>, ApiError>;

/// POST `/api/scan` - Enumerate a directory into a session.
pub async fn api_scan(
    State(state): State<Arc<AppState>>,
    Json(request): Json<ScanRequest>,
) -> ApiResult<ScanReport> {
    Ok(Json(state.pipeline.scan(&request).await?))
}

/// POST `/api/scan/{id}/interpret` - Interpret one chunk, or every
/// remaining chunk when `all` is set.
pub async fn api_interpret(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    body: Option<Json<InterpretBody>>,
) -> ApiResult<InterpretResponse> {
    let Json(body) = body.unwrap_or_default();
    let outcome = if body.all {
        state.pipeline.interpret_all(&id, &body.chunk).await?
    } else {
        state.pipeline.interpret(&id, &body.chunk).await?
    };
    Ok(Json(InterpretResponse {
        session_id: id,
        outcome,
    }))
}

/// POST `/api/scan/{id}/commit` - Project into the graph, then verify.
pub async fn api_commit(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    body: Option<Json<CommitBody>>,
) -> ApiResult<CommitResponse> {
    let Json(body) = body.unwrap_or_default();
    let commit = state.pipeline.commit(&id, body.mode).await?;
    let verification = if body.skip_verify {
        None
    } else {
        Some(state.pipeline.verify(&id).await?)
    };
    Ok(Json(CommitResponse {
        commit,
        verification,
    }))
}

/// GET `/api/scan/{id}/status`
pub async fn api_status(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<SessionReport> {
    Ok(Json(state.pipeline.status(&id)?))
}

/// POST `/api/scan/{id}/cancel`
pub async fn api_cancel(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<ScanSession> {
    Ok(Json(state.pipeline.cancel(&id)?))
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    #[serde(default = "default_limit")]
    pub limit: usize,
}

fn default_limit() -> usize {
    20
}

/// GET `/api/scans` - Recent sessions, newest first.
pub async fn api_sessions(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListQuery>,
) -> ApiResult<Vec<ScanSession>> {
    Ok(Json(state.pipeline.sessions(query.limit)?))
}

#[derive(Debug, Serialize)]
pub struct InterpreterInfo {
    pub id: String,
    pub version: String,
    pub name: String,
    pub runtime: String,
    pub extensions: Vec<String>,
}

/// GET `/api/interpreters`
pub async fn api_interpreters(State(state): State<Arc<AppState>>) -> Json<Vec<InterpreterInfo>> {
    let infos = state
        .pipeline
        .registry()
        .definitions()
        .iter()
        .map(|d| InterpreterInfo {
            id: d.id.clone(),
            version: d.version.clone(),
            name: d.name.clone(),
            runtime: d.runtime.clone(),
            extensions: d.extensions.clone(),
        })
        .collect();
    Json(infos)
}
