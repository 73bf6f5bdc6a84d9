//! Python source interpreter using tree-sitter.
//!
//! Built only with the `python` feature. Without it the interpreter still
//! registers but reports `MISSING_DEPENDENCY` for every file.

use std::io::Read;

use super::traits::{InterpretContext, InterpretOutcome, Interpreter};
use crate::config::PYTHON_MAX_READ_BYTES;

/// Most entries kept per list.
#[cfg_attr(not(feature = "python"), allow(dead_code))]
const MAX_ENTRIES: usize = 100;

/// Extracts functions, classes and imports from `.py` files.
#[derive(Debug, Clone, Default)]
pub struct PythonInterpreter;

impl PythonInterpreter {
    pub fn new() -> Self {
        Self
    }
}

impl Interpreter for PythonInterpreter {
    fn interpret(&self, input: &mut dyn Read, ctx: &InterpretContext<'_>) -> InterpretOutcome {
        let limit = ctx.config_usize("max_read_bytes", PYTHON_MAX_READ_BYTES);
        imp::interpret(input, ctx, limit)
    }
}

#[cfg(feature = "python")]
mod imp {
    use serde_json::{json, Map, Value};
    use std::io::Read;
    use tree_sitter::{Node, Parser as TSParser, Tree};

    use super::MAX_ENTRIES;
    use crate::interpreter::bounded::{coverage, read_prefix};
    use crate::interpreter::traits::{
        Extracted, InterpretContext, InterpretError, InterpretOutcome,
    };
    use crate::models::ErrorKind;

    pub(super) fn interpret(
        input: &mut dyn Read,
        ctx: &InterpretContext<'_>,
        limit: usize,
    ) -> InterpretOutcome {
        let prefix = read_prefix(input, limit)?;
        let content = String::from_utf8_lossy(&prefix.bytes);
        ctx.budget.check()?;

        let tree = parse_tree(&content)?;
        let root = tree.root_node();

        let mut outline = Outline::default();
        outline.visit(&root, &content);

        let mut data = Map::new();
        data.insert("classes".to_string(), Value::Array(outline.classes));
        data.insert("functions".to_string(), Value::Array(outline.functions));
        data.insert("has_main_guard".to_string(), json!(outline.has_main_guard));
        data.insert("has_syntax_errors".to_string(), json!(root.has_error()));
        data.insert("imports".to_string(), json!(outline.imports));
        data.insert("line_count".to_string(), json!(content.lines().count()));
        data.insert(
            "module_docstring".to_string(),
            json!(module_docstring(&root, &content)),
        );

        if prefix.truncated {
            let read = prefix.bytes.len() as u64;
            Ok(Extracted::partial(data, coverage(read, ctx.descriptor.size))
                .with_warning(format!("only the first {} bytes were parsed", read)))
        } else {
            Ok(Extracted::complete(data))
        }
    }

    fn parse_tree(content: &str) -> Result<Tree, InterpretError> {
        let mut parser = TSParser::new();
        parser
            .set_language(&tree_sitter_python::LANGUAGE.into())
            .map_err(|e| {
                InterpretError::new(
                    ErrorKind::MissingDependency,
                    format!("Failed to set language: {}", e),
                )
            })?;
        parser
            .parse(content, None)
            .ok_or_else(|| InterpretError::new(ErrorKind::ParseError, "Failed to parse content"))
    }

    fn node_text<'a>(node: &Node, content: &'a str) -> &'a str {
        content.get(node.byte_range()).unwrap_or("")
    }

    fn node_line(node: &Node) -> u32 {
        node.start_position().row as u32 + 1
    }

    fn module_docstring(root: &Node, content: &str) -> Option<String> {
        let first = root.named_child(0)?;
        if first.kind() != "expression_statement" {
            return None;
        }
        let string = first.named_child(0)?;
        if string.kind() != "string" {
            return None;
        }
        let text = node_text(&string, content)
            .trim_matches(|c| c == '"' || c == '\'')
            .trim();
        text.lines().next().map(|l| l.chars().take(200).collect())
    }

    #[derive(Default)]
    struct Outline {
        functions: Vec<Value>,
        classes: Vec<Value>,
        imports: Vec<String>,
        has_main_guard: bool,
    }

    impl Outline {
        fn visit(&mut self, node: &Node, content: &str) {
            let mut cursor = node.walk();
            for child in node.children(&mut cursor) {
                match child.kind() {
                    "function_definition" => self.function(&child, content, None),
                    "class_definition" => self.class(&child, content),
                    "decorated_definition" => {
                        if let Some(def) = child.child_by_field_name("definition") {
                            match def.kind() {
                                "function_definition" => self.function(&def, content, None),
                                "class_definition" => self.class(&def, content),
                                _ => {}
                            }
                        }
                    }
                    "import_statement" => self.import(&child, content),
                    "import_from_statement" => {
                        if let Some(module) = child.child_by_field_name("module_name") {
                            self.push_import(node_text(&module, content));
                        }
                    }
                    "if_statement" => {
                        let condition = child
                            .child_by_field_name("condition")
                            .map(|c| node_text(&c, content))
                            .unwrap_or("");
                        if condition.contains("__name__") && condition.contains("__main__") {
                            self.has_main_guard = true;
                        }
                    }
                    _ => {}
                }
            }
        }

        fn function(&mut self, node: &Node, content: &str, class: Option<&str>) {
            if self.functions.len() >= MAX_ENTRIES {
                return;
            }
            let Some(name) = node.child_by_field_name("name") else {
                return;
            };
            let name = node_text(&name, content);
            let qualified = match class {
                Some(class) => format!("{}.{}", class, name),
                None => name.to_string(),
            };
            self.functions.push(json!({
                "name": qualified,
                "line": node_line(node),
                "async": node_text(node, content).starts_with("async "),
            }));
        }

        fn class(&mut self, node: &Node, content: &str) {
            let Some(name_node) = node.child_by_field_name("name") else {
                return;
            };
            let name = node_text(&name_node, content).to_string();

            let bases: Vec<String> = node
                .child_by_field_name("superclasses")
                .map(|sc| {
                    let mut cursor = sc.walk();
                    sc.children(&mut cursor)
                        .filter(|c| c.kind() == "identifier" || c.kind() == "attribute")
                        .map(|c| node_text(&c, content).to_string())
                        .collect()
                })
                .unwrap_or_default();

            if self.classes.len() < MAX_ENTRIES {
                self.classes.push(json!({
                    "name": name,
                    "line": node_line(node),
                    "bases": bases,
                }));
            }

            if let Some(body) = node.child_by_field_name("body") {
                let mut cursor = body.walk();
                for stmt in body.children(&mut cursor) {
                    let def = match stmt.kind() {
                        "function_definition" => Some(stmt),
                        "decorated_definition" => stmt.child_by_field_name("definition"),
                        _ => None,
                    };
                    if let Some(def) = def.filter(|d| d.kind() == "function_definition") {
                        self.function(&def, content, Some(&name));
                    }
                }
            }
        }

        fn import(&mut self, node: &Node, content: &str) {
            let mut cursor = node.walk();
            for name in node.children_by_field_name("name", &mut cursor) {
                let module = match name.kind() {
                    "aliased_import" => name
                        .child_by_field_name("name")
                        .map(|n| node_text(&n, content))
                        .unwrap_or(""),
                    _ => node_text(&name, content),
                };
                self.push_import(module);
            }
        }

        fn push_import(&mut self, module: &str) {
            if module.is_empty() || self.imports.len() >= MAX_ENTRIES {
                return;
            }
            if !self.imports.iter().any(|m| m == module) {
                self.imports.push(module.to_string());
            }
        }
    }

}

#[cfg(not(feature = "python"))]
mod imp {
    use std::io::Read;

    use crate::interpreter::traits::{InterpretContext, InterpretError, InterpretOutcome};
    use crate::models::ErrorKind;

    pub(super) fn interpret(
        _input: &mut dyn Read,
        _ctx: &InterpretContext<'_>,
        _limit: usize,
    ) -> InterpretOutcome {
        Err(InterpretError::new(
            ErrorKind::MissingDependency,
            "built without the `python` feature",
        ))
    }
}
