use axum::{Json, extract::State};

use crate::api::state::ApiState;
use crate::metrics::Snapshot;
use crate::util::now_ms;

/// GET /api/v1/snapshot
///
/// Same payload as one live frame. Falls back to the empty snapshot when the
/// store cannot be read.
pub async fn get_snapshot(State(state): State<ApiState>) -> Json<Snapshot> {
    Json(state.snapshots.build_or_empty(now_ms()).await)
}
