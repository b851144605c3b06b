//! Ad-hoc probe endpoint

use axum::{
    Json,
    extract::{Path, State},
};
use tracing::info;

use super::windows::parse_probe;
use crate::{
    actors::messages::ProbeReport,
    api::{
        error::{ApiError, ApiResult},
        state::ApiState,
        types::RunRequest,
    },
};

/// POST /api/v1/:probe/run
///
/// Probe one target right away and store the sample
pub async fn run_probe(
    State(state): State<ApiState>,
    Path(probe): Path<String>,
    Json(request): Json<RunRequest>,
) -> ApiResult<Json<ProbeReport>> {
    let probe = parse_probe(&probe)?;

    let target = request.target.trim();
    if target.is_empty() {
        return Err(ApiError::InvalidRequest("target must not be empty".to_string()));
    }

    let collector = state
        .collectors
        .get(&probe)
        .ok_or_else(|| ApiError::NotFound(format!("{probe} probe is not enabled")))?;

    info!("Running ad-hoc {} probe against {}", probe, target);
    let report = collector.probe_now(target).await?;

    Ok(Json(report))
}
