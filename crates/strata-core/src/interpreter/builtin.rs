//! Built-in interpreter definitions.

use std::sync::Arc;

use super::definition::InterpreterDefinition;
use super::error::RegistryError;
use super::notebook::NotebookInterpreter;
use super::python::PythonInterpreter;
use super::registry::InterpreterRegistry;
use super::structured::StructuredConfigInterpreter;
use super::tabular::TabularInterpreter;
use super::text::PlainTextInterpreter;
use crate::config::NOTEBOOK_MAX_SIZE_BYTES;

pub const NOTEBOOK_ID: &str = "notebook";
pub const PYTHON_ID: &str = "python";
pub const TABULAR_ID: &str = "tabular";
pub const STRUCTURED_ID: &str = "structured";
pub const TEXT_ID: &str = "text";

/// Every built-in definition, in registration order.
pub fn definitions() -> Vec<InterpreterDefinition> {
    let python_runtime = if cfg!(feature = "python") {
        "tree-sitter"
    } else {
        "unavailable"
    };

    vec![
        InterpreterDefinition::new(NOTEBOOK_ID, "1.0.0", Arc::new(NotebookInterpreter::new()))
            .with_name("Jupyter notebook")
            .with_runtime("streaming-json")
            .with_extensions(&["ipynb"])
            .with_max_size(NOTEBOOK_MAX_SIZE_BYTES),
        InterpreterDefinition::new(PYTHON_ID, "1.0.0", Arc::new(PythonInterpreter::new()))
            .with_name("Python source")
            .with_runtime(python_runtime)
            .with_extensions(&["py", "pyi"]),
        InterpreterDefinition::new(TABULAR_ID, "1.0.0", Arc::new(TabularInterpreter::new()))
            .with_name("Delimited table")
            .with_extensions(&["csv", "tsv"]),
        InterpreterDefinition::new(
            STRUCTURED_ID,
            "1.0.0",
            Arc::new(StructuredConfigInterpreter::new()),
        )
        .with_name("Structured config")
        .with_extensions(&["json", "yaml", "yml", "toml"]),
        InterpreterDefinition::new(TEXT_ID, "1.0.0", Arc::new(PlainTextInterpreter::new()))
            .with_name("Plain text")
            .with_extensions(&["txt", "md", "rst", "log"]),
    ]
}

/// Register every built-in interpreter.
pub fn register_defaults(registry: &InterpreterRegistry) -> Result<(), RegistryError> {
    for definition in definitions() {
        registry.register(definition, false)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::FileDescriptor;

    #[test]
    fn test_defaults_cover_extensions() {
        let registry = InterpreterRegistry::new();
        register_defaults(&registry).unwrap();

        let cases = [
            ("/a.ipynb", NOTEBOOK_ID),
            ("/a.py", PYTHON_ID),
            ("/a.CSV", TABULAR_ID),
            ("/a.yml", STRUCTURED_ID),
            ("/a.md", TEXT_ID),
        ];
        for (path, id) in cases {
            let res = registry
                .resolve(&FileDescriptor::new(path, 1, 0))
                .unwrap()
                .unwrap();
            assert_eq!(res.definition.id, id, "{}", path);
        }
        assert!(registry
            .resolve(&FileDescriptor::new("/a.exe", 1, 0))
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_register_defaults_twice_is_idempotent() {
        let registry = InterpreterRegistry::new();
        register_defaults(&registry).unwrap();
        register_defaults(&registry).unwrap();
        assert_eq!(registry.definitions().len(), 5);
    }

    #[test]
    fn test_notebook_has_size_cap() {
        let registry = InterpreterRegistry::new();
        register_defaults(&registry).unwrap();
        let nb = registry.get(NOTEBOOK_ID).unwrap();
        assert_eq!(nb.limits.max_size_bytes, Some(NOTEBOOK_MAX_SIZE_BYTES));
    }
}
