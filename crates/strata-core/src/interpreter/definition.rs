//! Interpreter definitions held by the registry.

use serde_json::{Map, Value};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use super::traits::Interpreter;
use crate::models::normalize_extension;

/// Per-interpreter overrides of the engine's default budgets.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Limits {
    pub max_size_bytes: Option<u64>,
    pub timeout: Option<Duration>,
}

/// A registered interpreter. Immutable once registered.
#[derive(Clone)]
pub struct InterpreterDefinition {
    pub id: String,
    pub version: String,
    pub name: String,
    /// Informational only; every interpreter runs under the same limits.
    pub runtime: String,
    /// Lower-case, dot-prefixed.
    pub extensions: Vec<String>,
    pub limits: Limits,
    pub config: Map<String, Value>,
    implementation: Arc<dyn Interpreter>,
}

impl InterpreterDefinition {
    pub fn new(
        id: impl Into<String>,
        version: impl Into<String>,
        implementation: Arc<dyn Interpreter>,
    ) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            version: version.into(),
            runtime: "native".to_string(),
            extensions: Vec::new(),
            limits: Limits::default(),
            config: Map::new(),
            implementation,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_runtime(mut self, runtime: impl Into<String>) -> Self {
        self.runtime = runtime.into();
        self
    }

    pub fn with_extensions(mut self, extensions: &[&str]) -> Self {
        self.extensions = extensions
            .iter()
            .map(|e| normalize_extension(e))
            .filter(|e| !e.is_empty())
            .collect();
        self
    }

    pub fn with_max_size(mut self, bytes: u64) -> Self {
        self.limits.max_size_bytes = Some(bytes);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.limits.timeout = Some(timeout);
        self
    }

    pub fn with_config(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.config.insert(key.into(), value.into());
        self
    }

    pub fn interpreter(&self) -> &Arc<dyn Interpreter> {
        &self.implementation
    }

    pub fn supports_extension(&self, extension: &str) -> bool {
        let ext = normalize_extension(extension);
        self.extensions.iter().any(|e| *e == ext)
    }
}

impl fmt::Debug for InterpreterDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InterpreterDefinition")
            .field("id", &self.id)
            .field("version", &self.version)
            .field("runtime", &self.runtime)
            .field("extensions", &self.extensions)
            .field("limits", &self.limits)
            .finish_non_exhaustive()
    }
}
