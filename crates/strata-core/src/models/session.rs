//! Scan sessions and their rows.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::descriptor::FileDescriptor;
use super::result::InterpretationResult;

/// Lifecycle of a scan session. Everything but `Running` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Running,
    Completed,
    Failed,
    Canceled,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Canceled => "canceled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Running)
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SessionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "running" => Ok(Self::Running),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "canceled" => Ok(Self::Canceled),
            other => Err(format!("unknown session status '{}'", other)),
        }
    }
}

/// One enumeration run over a target.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanSession {
    pub id: String,
    pub root: String,
    pub recursive: bool,
    pub provider_id: String,
    pub status: SessionStatus,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub files_seen: u64,
    pub bytes_seen: u64,
    pub interpreted_count: u64,
    pub error_count: u64,
}

/// One enumerated file within a session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanRow {
    pub session_id: String,
    /// Gap-free, strictly increasing within the session.
    pub row_id: i64,
    pub descriptor: FileDescriptor,
    pub interpretation: Option<InterpretationResult>,
    /// Bumped whenever the stored interpretation changes outcome.
    pub revision: i64,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_round_trips_through_str() {
        for status in [
            SessionStatus::Running,
            SessionStatus::Completed,
            SessionStatus::Failed,
            SessionStatus::Canceled,
        ] {
            assert_eq!(status.as_str().parse::<SessionStatus>().unwrap(), status);
        }
        assert!("paused".parse::<SessionStatus>().is_err());
    }

    #[test]
    fn test_only_running_is_active() {
        assert!(!SessionStatus::Running.is_terminal());
        assert!(SessionStatus::Canceled.is_terminal());
    }
}
