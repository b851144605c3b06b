pub mod actors;
pub mod api;
pub mod config;
pub mod metrics;
pub mod probes;
pub mod storage;
pub mod supervisor;
pub mod util;

use serde::{Deserialize, Serialize};

/// The kind of network operation a collector performs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProbeKind {
    Ping,
    Dns,
    Http,
    Traceroute,
}

impl ProbeKind {
    /// All probe kinds, in startup order
    pub const ALL: [ProbeKind; 4] = [
        ProbeKind::Ping,
        ProbeKind::Dns,
        ProbeKind::Http,
        ProbeKind::Traceroute,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ProbeKind::Ping => "ping",
            ProbeKind::Dns => "dns",
            ProbeKind::Http => "http",
            ProbeKind::Traceroute => "traceroute",
        }
    }
}

impl std::fmt::Display for ProbeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ProbeKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ping" => Ok(ProbeKind::Ping),
            "dns" => Ok(ProbeKind::Dns),
            "http" => Ok(ProbeKind::Http),
            "traceroute" => Ok(ProbeKind::Traceroute),
            other => Err(format!("unknown probe kind: {other}")),
        }
    }
}
