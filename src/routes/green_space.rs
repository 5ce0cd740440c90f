use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use garde::Validate;
use uuid::Uuid;

use crate::app_state::AppState;
use crate::models::analysis::{GreenSpaceRequest, RecentGreenSpace, SubmitResponse};
use crate::models::job::{AnalysisJob, AnalysisKind};
use crate::routes::analysis::{find_job, recent_limit, RecentParams};
use crate::routes::error::ApiError;

const DEFAULT_RECENT_LIMIT: usize = 5;

/// POST /api/green-space/analyze: classify imagery around an address.
pub async fn submit_green_space(
    State(state): State<AppState>,
    Json(request): Json<GreenSpaceRequest>,
) -> Result<(StatusCode, Json<SubmitResponse>), ApiError> {
    request.validate()?;
    let response = state.dispatcher.submit_green_space(request).await?;
    Ok((StatusCode::ACCEPTED, Json(response)))
}

/// GET /api/green-space/{analysis_id}
pub async fn get_green_space(
    State(state): State<AppState>,
    Path(analysis_id): Path<Uuid>,
) -> Result<Json<AnalysisJob>, ApiError> {
    find_job(&state, analysis_id, AnalysisKind::GreenSpace).await.map(Json)
}

/// GET /api/green-space/recent
pub async fn recent_green_space(
    State(state): State<AppState>,
    Query(params): Query<RecentParams>,
) -> Result<Json<Vec<RecentGreenSpace>>, ApiError> {
    let limit = recent_limit(params.limit, DEFAULT_RECENT_LIMIT);
    let jobs = state
        .store
        .list_recent_completed(AnalysisKind::GreenSpace, limit)
        .await?;
    let recent = jobs
        .iter()
        .filter_map(AnalysisJob::green_space_result)
        .map(RecentGreenSpace::from)
        .collect();
    Ok(Json(recent))
}
