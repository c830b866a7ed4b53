//! Write-ahead log entries used to detect and roll back crash-interrupted
//! transaction state transitions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle of a single WAL entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WalStatus {
    Pending,
    Completed,
    RolledBack,
}

impl std::fmt::Display for WalStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            WalStatus::Pending => "PENDING",
            WalStatus::Completed => "COMPLETED",
            WalStatus::RolledBack => "ROLLED_BACK",
        };
        f.write_str(s)
    }
}

/// One append-only log row. `action` is a free-form string; state transitions
/// record it as `STATE_<from>_TO_<to>`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalEntry {
    pub id: i64,
    pub transaction_id: String,
    pub action: String,
    pub data: serde_json::Value,
    pub status: WalStatus,
    pub created_at: DateTime<Utc>,
}

/// Format the action string recorded for a state transition.
#[must_use]
pub fn transition_action(from: impl std::fmt::Display, to: impl std::fmt::Display) -> String {
    format!("STATE_{from}_TO_{to}")
}
