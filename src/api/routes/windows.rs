//! Window statistics and raw series endpoints

use std::collections::BTreeMap;

use axum::{
    Json,
    extract::{Path, Query, State},
};

use crate::{
    ProbeKind,
    api::{
        error::{ApiError, ApiResult},
        state::ApiState,
        types::{SeriesQuery, SeriesResponse, WindowsQuery, WindowsResponse},
    },
    metrics::LatencyField,
    storage::{Sample, SampleQuery},
    util::now_ms,
};

pub(crate) fn parse_probe(probe: &str) -> ApiResult<ProbeKind> {
    probe.parse().map_err(ApiError::NotFound)
}

/// GET /api/v1/:probe/windows?key=
///
/// 1 minute, 5 minute and 1 hour stats for one target, or all targets
/// combined without a key
pub async fn get_windows(
    State(state): State<ApiState>,
    Path(probe): Path<String>,
    Query(query): Query<WindowsQuery>,
) -> ApiResult<Json<WindowsResponse>> {
    let probe = parse_probe(&probe)?;
    let now = now_ms();

    let windows = state
        .aggregator
        .window_set(probe, query.key.as_deref(), LatencyField::Latency, now)
        .await?;

    Ok(Json(WindowsResponse {
        probe,
        key: query.key,
        ts: now,
        windows,
    }))
}

/// GET /api/v1/:probe/series?range=short|medium|long&key=&group=key
///
/// Raw samples of the preset lookback, oldest first
pub async fn get_series(
    State(state): State<ApiState>,
    Path(probe): Path<String>,
    Query(query): Query<SeriesQuery>,
) -> ApiResult<Json<SeriesResponse>> {
    let probe = parse_probe(&probe)?;

    let grouped = match query.group.as_deref() {
        None => false,
        Some("key") => true,
        Some(other) => {
            return Err(ApiError::InvalidRequest(format!(
                "unsupported group '{other}' (expected 'key')"
            )));
        }
    };

    let now = now_ms();
    let samples = state
        .store
        .query_samples(SampleQuery {
            probe,
            key: query.key,
            from_ts: now - query.range.duration().as_millis() as i64 + 1,
            to_ts: now,
            limit: None,
        })
        .await?;

    if !grouped {
        return Ok(Json(SeriesResponse::Flat(samples)));
    }

    let mut by_key: BTreeMap<String, Vec<Sample>> = BTreeMap::new();
    for sample in samples {
        by_key.entry(sample.key.clone()).or_default().push(sample);
    }

    Ok(Json(SeriesResponse::Grouped(by_key)))
}
