//! Interpretation results and their error taxonomy.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::time::Duration;

/// Outcome class of one interpretation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResultStatus {
    Success,
    Partial,
    Error,
}

/// Per-file failure classes. These are recorded as data, never raised.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    ParseError,
    CorruptInput,
    UnsupportedVersion,
    FileTooLarge,
    Timeout,
    MissingDependency,
    Backpressure,
    IoError,
    Canceled,
    Internal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ParseError => "PARSE_ERROR",
            Self::CorruptInput => "CORRUPT_INPUT",
            Self::UnsupportedVersion => "UNSUPPORTED_VERSION",
            Self::FileTooLarge => "FILE_TOO_LARGE",
            Self::Timeout => "TIMEOUT",
            Self::MissingDependency => "MISSING_DEPENDENCY",
            Self::Backpressure => "BACKPRESSURE",
            Self::IoError => "IO_ERROR",
            Self::Canceled => "CANCELED",
            Self::Internal => "INTERNAL",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warning,
}

/// A typed error or warning attached to a result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Issue {
    pub severity: Severity,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<ErrorKind>,
    pub message: String,
    /// Byte offset into the input, when the interpreter knows it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub offset: Option<u64>,
}

impl Issue {
    pub fn error(kind: ErrorKind, message: impl Into<String>, offset: Option<u64>) -> Self {
        Self {
            severity: Severity::Error,
            kind: Some(kind),
            message: message.into(),
            offset,
        }
    }

    pub fn warning(message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Warning,
            kind: None,
            message: message.into(),
            offset: None,
        }
    }
}

/// What an interpreter produced for one file.
///
/// `status == Error` keeps `data` empty; `status == Partial` always carries
/// `coverage` in `0.0..=1.0`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InterpretationResult {
    pub status: ResultStatus,
    #[serde(default)]
    pub data: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub coverage: Option<f64>,
    #[serde(default)]
    pub issues: Vec<Issue>,
    pub duration_ms: u64,
    pub interpreter_id: String,
    pub interpreter_version: String,
}

impl InterpretationResult {
    pub fn success(
        interpreter_id: impl Into<String>,
        interpreter_version: impl Into<String>,
        data: Map<String, Value>,
    ) -> Self {
        Self {
            status: ResultStatus::Success,
            data,
            coverage: None,
            issues: Vec::new(),
            duration_ms: 0,
            interpreter_id: interpreter_id.into(),
            interpreter_version: interpreter_version.into(),
        }
    }

    pub fn partial(
        interpreter_id: impl Into<String>,
        interpreter_version: impl Into<String>,
        data: Map<String, Value>,
        coverage: f64,
    ) -> Self {
        Self {
            status: ResultStatus::Partial,
            coverage: Some(coverage.clamp(0.0, 1.0)),
            ..Self::success(interpreter_id, interpreter_version, data)
        }
    }

    pub fn error(
        interpreter_id: impl Into<String>,
        interpreter_version: impl Into<String>,
        kind: ErrorKind,
        message: impl Into<String>,
        offset: Option<u64>,
    ) -> Self {
        Self {
            status: ResultStatus::Error,
            data: Map::new(),
            coverage: None,
            issues: vec![Issue::error(kind, message, offset)],
            duration_ms: 0,
            interpreter_id: interpreter_id.into(),
            interpreter_version: interpreter_version.into(),
        }
    }

    pub fn with_duration(mut self, elapsed: Duration) -> Self {
        self.duration_ms = elapsed.as_millis() as u64;
        self
    }

    pub fn with_warnings(mut self, warnings: impl IntoIterator<Item = String>) -> Self {
        self.issues.extend(warnings.into_iter().map(Issue::warning));
        self
    }

    pub fn is_error(&self) -> bool {
        self.status == ResultStatus::Error
    }

    /// Kind of the first error issue, if any.
    pub fn error_kind(&self) -> Option<ErrorKind> {
        self.issues
            .iter()
            .find(|i| i.severity == Severity::Error)
            .and_then(|i| i.kind)
    }

    /// Same outcome as `other`, ignoring how long each run took.
    pub fn same_outcome(&self, other: &InterpretationResult) -> bool {
        self.status == other.status
            && self.data == other.data
            && self.coverage == other.coverage
            && self.issues == other.issues
            && self.interpreter_id == other.interpreter_id
            && self.interpreter_version == other.interpreter_version
    }

    /// Enforce the serialized payload cap.
    ///
    /// Entries are kept in key order while they fit; the rest are dropped and
    /// `"truncated": true` is added. Returns whether anything was dropped.
    pub fn enforce_payload_cap(&mut self, max_bytes: usize) -> bool {
        let total = serialized_len(&self.data);
        if total <= max_bytes {
            return false;
        }

        // `{}` plus `,"truncated":true`
        let mut used = 2 + 17;
        let mut kept = Map::new();
        for (key, value) in std::mem::take(&mut self.data) {
            // Serialized key and value, plus `:` and `,`.
            let entry = serialized_len(&key) + serialized_len(&value) + 2;
            if used + entry <= max_bytes {
                used += entry;
                kept.insert(key, value);
            }
        }
        kept.insert("truncated".to_string(), Value::Bool(true));

        self.data = kept;
        self.issues.push(Issue::warning(format!(
            "payload of {} bytes exceeded the {} byte cap and was truncated",
            total, max_bytes
        )));
        true
    }
}

fn serialized_len<T: Serialize + ?Sized>(value: &T) -> usize {
    serde_json::to_vec(value).map(|v| v.len()).unwrap_or(usize::MAX)
}
