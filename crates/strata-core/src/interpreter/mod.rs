//! Pluggable file interpreters and the registry that selects them.
//!
//! Each interpreter extracts a small, bounded summary from one file. The
//! registry picks at most one interpreter per file, using prioritized
//! selection rules first and the extension table as a fallback.
//!
//! ## Components
//!
//! - `Interpreter` trait - Common interface for every file format
//! - `InterpreterRegistry` - Rules + extension table, copy-on-write
//! - `JsonEvents` - Incremental JSON tokenizer for large documents
//!
//! ## Built-in interpreters
//!
//! - Notebooks (`.ipynb`, streaming, never fully materialized)
//! - Python source (tree-sitter, behind the `python` feature)
//! - Tabular (`.csv`, `.tsv`)
//! - Structured config (`.json`, `.yaml`, `.yml`, `.toml`)
//! - Plain text (`.txt`, `.md`, `.rst`, `.log`)

mod bounded;
mod budget;
pub mod builtin;
mod definition;
mod error;
pub mod json_stream;
mod notebook;
mod python;
mod registry;
mod structured;
mod tabular;
mod text;
mod traits;

pub use budget::{Budget, CancelToken};
pub use definition::{InterpreterDefinition, Limits};
pub use error::RegistryError;
pub use notebook::NotebookInterpreter;
pub use python::PythonInterpreter;
pub use registry::{
    InterpreterRegistry, NoSiblings, Resolution, RuleMatch, SelectionRule, SiblingIndex,
};
pub use structured::StructuredConfigInterpreter;
pub use tabular::TabularInterpreter;
pub use text::PlainTextInterpreter;
pub use traits::{Extracted, InterpretContext, InterpretError, InterpretOutcome, Interpreter};
