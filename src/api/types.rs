//! Request and response types of the query endpoints

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::ProbeKind;
use crate::metrics::WindowSet;
use crate::storage::Sample;

/// Response of `GET /api/v1/health`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub timestamp: String,
    pub store: String,
}

/// Lookback presets of the series endpoint
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RangePreset {
    /// Last hour
    #[default]
    Short,

    /// Last 6 hours
    Medium,

    /// Last 24 hours
    Long,
}

impl RangePreset {
    pub fn duration(&self) -> Duration {
        match self {
            RangePreset::Short => Duration::from_secs(60 * 60),
            RangePreset::Medium => Duration::from_secs(6 * 60 * 60),
            RangePreset::Long => Duration::from_secs(24 * 60 * 60),
        }
    }
}

/// Query parameters of `GET /api/v1/:probe/series`
#[derive(Debug, Default, Deserialize)]
pub struct SeriesQuery {
    #[serde(default)]
    pub range: RangePreset,

    /// Only this target
    pub key: Option<String>,

    /// `key` to get a map of target to samples
    pub group: Option<String>,
}

/// Query parameters of `GET /api/v1/:probe/windows`
#[derive(Debug, Default, Deserialize)]
pub struct WindowsQuery {
    pub key: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WindowsResponse {
    pub probe: ProbeKind,
    pub key: Option<String>,
    pub ts: i64,
    #[serde(flatten)]
    pub windows: WindowSet,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SeriesResponse {
    Flat(Vec<Sample>),
    Grouped(BTreeMap<String, Vec<Sample>>),
}

/// Body of `POST /api/v1/:probe/run`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunRequest {
    pub target: String,
}
