use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use garde::Validate;
use serde::Deserialize;
use uuid::Uuid;

use crate::app_state::AppState;
use crate::models::analysis::{AnalysisRequest, RecentAnalysis, SubmitResponse};
use crate::models::job::{AnalysisJob, AnalysisKind};
use crate::routes::error::ApiError;

const DEFAULT_RECENT_LIMIT: usize = 10;
const MAX_RECENT_LIMIT: usize = 50;

/// POST /api/neighborhood/analyze: validate and dispatch a new analysis.
pub async fn submit_analysis(
    State(state): State<AppState>,
    Json(request): Json<AnalysisRequest>,
) -> Result<(StatusCode, Json<SubmitResponse>), ApiError> {
    request.validate()?;
    let response = state.dispatcher.submit(request).await?;
    Ok((StatusCode::ACCEPTED, Json(response)))
}

/// GET /api/neighborhood/{analysis_id}: full job record.
pub async fn get_analysis(
    State(state): State<AppState>,
    Path(analysis_id): Path<Uuid>,
) -> Result<Json<AnalysisJob>, ApiError> {
    find_job(&state, analysis_id, AnalysisKind::Neighborhood).await.map(Json)
}

/// Load a job of the given kind; a job of the other kind is reported as missing.
pub(crate) async fn find_job(
    state: &AppState,
    analysis_id: Uuid,
    kind: AnalysisKind,
) -> Result<AnalysisJob, ApiError> {
    state
        .store
        .get(analysis_id)
        .await?
        .filter(|job| job.kind == kind)
        .ok_or_else(|| ApiError::NotFound {
            message: format!("Analysis {} not found", analysis_id),
            hints: vec!["poll GET /api/tasks/{task_id} while the analysis is still running".to_string()],
        })
}

/// Clamp a `limit` query parameter.
pub(crate) fn recent_limit(requested: Option<usize>, default: usize) -> usize {
    requested.unwrap_or(default).clamp(1, MAX_RECENT_LIMIT)
}

#[derive(Debug, Deserialize)]
pub struct RecentParams {
    pub limit: Option<usize>,
}

/// GET /api/neighborhood/recent: completed analyses, newest first.
pub async fn recent_analyses(
    State(state): State<AppState>,
    Query(params): Query<RecentParams>,
) -> Result<Json<Vec<RecentAnalysis>>, ApiError> {
    let limit = recent_limit(params.limit, DEFAULT_RECENT_LIMIT);
    let jobs = state
        .store
        .list_recent_completed(AnalysisKind::Neighborhood, limit)
        .await?;
    let recent = jobs
        .iter()
        .filter_map(AnalysisJob::result)
        .map(|r| RecentAnalysis::from(&r))
        .collect();
    Ok(Json(recent))
}
