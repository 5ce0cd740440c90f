use axum::extract::{Path, State};
use axum::Json;

use crate::app_state::AppState;
use crate::models::analysis::TaskStatusResponse;
use crate::routes::error::ApiError;

/// GET /api/tasks/{task_id}: status of a submitted analysis.
pub async fn get_task_status(
    State(state): State<AppState>,
    Path(task_id): Path<String>,
) -> Result<Json<TaskStatusResponse>, ApiError> {
    let status = state.resolver.resolve(&task_id).await?;
    tracing::debug!(
        task_id = %task_id,
        status = %status.status,
        progress = status.progress,
        "Task status resolved"
    );
    Ok(Json(status))
}
