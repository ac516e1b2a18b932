use axum::{Json, extract::State};

use crate::api::{error::ApiResult, state::ApiState, types::ProblemsResponse};

/// GET /api/v1/problems
pub async fn list_problems(State(state): State<ApiState>) -> ApiResult<Json<ProblemsResponse>> {
    let problems = state.arbiter.problems().await?;
    Ok(Json(ProblemsResponse {
        total: problems.len(),
        problems,
    }))
}
