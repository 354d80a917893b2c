use std::fmt;

use serde::Serialize;

/// Feed health as published on the handle's watch channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ScanHealth {
    Starting,
    Healthy,
    /// Waiting out the backoff before reconnect attempt `attempt`.
    Reconnecting { attempt: u32 },
    /// Retries exhausted; terminal.
    Degraded { reason: String },
}

impl ScanHealth {
    pub fn is_degraded(&self) -> bool {
        matches!(self, ScanHealth::Degraded { .. })
    }
}

impl fmt::Display for ScanHealth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScanHealth::Starting => f.write_str("Starting"),
            ScanHealth::Healthy => f.write_str("Healthy"),
            ScanHealth::Reconnecting { attempt } => write!(f, "Reconnecting({attempt})"),
            ScanHealth::Degraded { reason } => write!(f, "Degraded({reason})"),
        }
    }
}
