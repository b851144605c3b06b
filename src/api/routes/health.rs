//! Health check endpoint

use axum::{Json, extract::State};

use crate::api::{
    error::{ApiError, ApiResult},
    state::ApiState,
    types::HealthResponse,
};
use crate::util::{format_ts, now_ms};

/// GET /api/v1/health
///
/// Reports whether the store is usable; 503 if it is not
pub async fn health_check(State(state): State<ApiState>) -> ApiResult<Json<HealthResponse>> {
    let health = state.store.health_check().await?;

    if !health.healthy {
        return Err(ApiError::StoreUnavailable(health.message));
    }

    Ok(Json(HealthResponse {
        status: "ok".to_string(),
        timestamp: format_ts(now_ms()),
        store: health.message,
    }))
}
