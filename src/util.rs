use std::net::SocketAddr;
use std::path::PathBuf;

use chrono::Utc;

const MINUTE_MS: i64 = 60_000;

/// Current wall-clock time as epoch milliseconds
pub fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

/// Round an epoch-ms timestamp down to the start of its minute
pub fn align_to_minute(ts: i64) -> i64 {
    ts - ts.rem_euclid(MINUTE_MS)
}

/// Render an epoch-ms timestamp as RFC 3339 (for logs and API responses)
pub fn format_ts(ts: i64) -> String {
    chrono::DateTime::from_timestamp_millis(ts)
        .map(|dt| dt.to_rfc3339())
        .unwrap_or_else(|| ts.to_string())
}

const LISTEN_ADDR: &str = "NETWATCH_LISTEN";

pub fn get_listen_addr() -> Option<SocketAddr> {
    std::env::var(LISTEN_ADDR).ok().and_then(|v| v.parse().ok())
}

const DB_PATH: &str = "NETWATCH_DB";

pub fn get_db_path() -> Option<PathBuf> {
    std::env::var(DB_PATH).ok().map(PathBuf::from)
}
