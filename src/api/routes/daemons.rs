//! Daemon endpoints

use axum::{
    Json,
    extract::{Path, State},
};

use crate::{
    api::{
        error::{ApiError, ApiResult},
        state::ApiState,
        types::DaemonsResponse,
    },
    dispatcher::DaemonStatus,
    links::DaemonType,
};

/// GET /api/v1/daemons
pub async fn list_daemons(State(state): State<ApiState>) -> ApiResult<Json<DaemonsResponse>> {
    let daemons = state.arbiter.status().await?.daemons;
    Ok(Json(DaemonsResponse {
        total: daemons.len(),
        daemons,
    }))
}

/// GET /api/v1/daemons/{type}/{name}
pub async fn get_daemon(
    State(state): State<ApiState>,
    Path((daemon_type, name)): Path<(String, String)>,
) -> ApiResult<Json<DaemonStatus>> {
    let daemon_type: DaemonType = daemon_type.parse().map_err(ApiError::InvalidRequest)?;

    state
        .arbiter
        .status()
        .await?
        .daemons
        .into_iter()
        .find(|daemon| daemon.daemon_type == daemon_type && daemon.name == name)
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("no {daemon_type} named '{name}'")))
}
