//! Core interpreter trait for format-specific metadata extraction.

use serde_json::{Map, Value};
use std::io::Read;

use super::budget::Budget;
use crate::models::{ErrorKind, FileDescriptor};

/// Format-specific interpreter.
///
/// Implement this trait for each file format. An interpreter only ever sees a
/// read-only byte stream and a read-only context: it has no handle that could
/// write to the file, touch other paths, or reach the network.
///
/// # Example Implementation
///
/// ```ignore
/// impl Interpreter for LineCounter {
///     fn interpret(&self, input: &mut dyn Read, ctx: &InterpretContext<'_>) -> InterpretOutcome {
///         let mut text = String::new();
///         input.read_to_string(&mut text).map_err(InterpretError::io)?;
///         let mut data = Map::new();
///         data.insert("lines".into(), text.lines().count().into());
///         Ok(Extracted::complete(data))
///     }
/// }
/// ```
pub trait Interpreter: Send + Sync {
    /// Extract a bounded summary from `input`.
    ///
    /// Long-running implementations should call `ctx.budget.check()`
    /// periodically and return its error.
    fn interpret(&self, input: &mut dyn Read, ctx: &InterpretContext<'_>) -> InterpretOutcome;
}

/// Read-only context for one interpretation.
pub struct InterpretContext<'a> {
    pub descriptor: &'a FileDescriptor,
    /// Definition config overlaid with the matched rule's overrides.
    pub config: &'a Map<String, Value>,
    pub budget: &'a Budget,
}

impl<'a> InterpretContext<'a> {
    pub fn new(
        descriptor: &'a FileDescriptor,
        config: &'a Map<String, Value>,
        budget: &'a Budget,
    ) -> Self {
        Self {
            descriptor,
            config,
            budget,
        }
    }

    /// Numeric config value, or `default` when absent or not a number.
    pub fn config_u64(&self, key: &str, default: u64) -> u64 {
        self.config.get(key).and_then(Value::as_u64).unwrap_or(default)
    }

    pub fn config_usize(&self, key: &str, default: usize) -> usize {
        self.config_u64(key, default as u64) as usize
    }
}

/// Successful extraction. `coverage` set means the summary is partial.
#[derive(Debug, Clone, Default)]
pub struct Extracted {
    pub data: Map<String, Value>,
    pub coverage: Option<f64>,
    pub warnings: Vec<String>,
}

impl Extracted {
    pub fn complete(data: Map<String, Value>) -> Self {
        Self {
            data,
            coverage: None,
            warnings: Vec::new(),
        }
    }

    pub fn partial(data: Map<String, Value>, coverage: f64) -> Self {
        Self {
            data,
            coverage: Some(coverage),
            warnings: Vec::new(),
        }
    }

    pub fn with_warning(mut self, warning: impl Into<String>) -> Self {
        self.warnings.push(warning.into());
        self
    }
}

/// Classified interpretation failure.
#[derive(Debug, Clone)]
pub struct InterpretError {
    pub kind: ErrorKind,
    pub message: String,
    pub offset: Option<u64>,
}

impl InterpretError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            offset: None,
        }
    }

    pub fn at(mut self, offset: u64) -> Self {
        self.offset = Some(offset);
        self
    }

    pub fn io(err: std::io::Error) -> Self {
        Self::new(ErrorKind::IoError, err.to_string())
    }
}

pub type InterpretOutcome = Result<Extracted, InterpretError>;
