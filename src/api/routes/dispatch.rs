use axum::{Json, extract::State};

use crate::api::{error::ApiResult, state::ApiState, types::DispatchSummary};

/// GET /api/v1/dispatch
pub async fn get_dispatch(State(state): State<ApiState>) -> ApiResult<Json<DispatchSummary>> {
    let status = state.arbiter.status().await?;
    Ok(Json(DispatchSummary::from(&status)))
}
