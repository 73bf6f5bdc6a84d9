//! Graph projection bookkeeping.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::str::FromStr;

/// Where a session's graph projection stands.
///
/// `Verified` drops back to `Committed` whenever a later commit projects
/// more rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProjectionState {
    NotCommitted,
    Committed,
    Verified,
}

impl ProjectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotCommitted => "not_committed",
            Self::Committed => "committed",
            Self::Verified => "verified",
        }
    }
}

impl FromStr for ProjectionState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "not_committed" => Ok(Self::NotCommitted),
            "committed" => Ok(Self::Committed),
            "verified" => Ok(Self::Verified),
            other => Err(format!("unknown projection state '{}'", other)),
        }
    }
}

/// Per-session record of what has been projected into the graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphCommitRecord {
    pub session_id: String,
    /// Highest row id already projected; 0 before the first commit.
    pub high_water_row_id: i64,
    pub state: ProjectionState,
    pub nodes_upserted: u64,
    pub relationships_upserted: u64,
    pub last_verification: Option<VerificationReport>,
    pub committed_at: Option<DateTime<Utc>>,
    pub verified_at: Option<DateTime<Utc>>,
}

impl GraphCommitRecord {
    pub fn new(session_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            high_water_row_id: 0,
            state: ProjectionState::NotCommitted,
            nodes_upserted: 0,
            relationships_upserted: 0,
            last_verification: None,
            committed_at: None,
            verified_at: None,
        }
    }
}

/// One count that did not match.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Discrepancy {
    pub name: String,
    pub expected: u64,
    pub observed: u64,
}

/// Expected vs observed graph counts for one session.
///
/// Discrepancies are a data-quality signal for operators, not a failure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerificationReport {
    pub session_id: String,
    pub expected: BTreeMap<String, u64>,
    pub observed: BTreeMap<String, u64>,
    pub discrepancies: Vec<Discrepancy>,
    pub verified_at: DateTime<Utc>,
}

impl VerificationReport {
    /// Build a report, deriving discrepancies from the two count maps.
    pub fn compare(
        session_id: impl Into<String>,
        expected: BTreeMap<String, u64>,
        observed: BTreeMap<String, u64>,
    ) -> Self {
        let discrepancies = expected
            .iter()
            .filter_map(|(name, &want)| {
                let got = observed.get(name).copied().unwrap_or(0);
                (want != got).then(|| Discrepancy {
                    name: name.clone(),
                    expected: want,
                    observed: got,
                })
            })
            .collect();

        Self {
            session_id: session_id.into(),
            expected,
            observed,
            discrepancies,
            verified_at: Utc::now(),
        }
    }

    pub fn is_consistent(&self) -> bool {
        self.discrepancies.is_empty()
    }
}
