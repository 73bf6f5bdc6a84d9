//! Structured config interpreter (`.json`, `.yaml`, `.yml`, `.toml`).
//!
//! Parses the document fully, so reads are capped; anything larger than the
//! cap is reported as `FILE_TOO_LARGE` rather than parsed from a prefix.

use serde_json::{json, Map, Value};
use std::io::Read;

use super::bounded::read_prefix;
use super::traits::{Extracted, InterpretContext, InterpretError, InterpretOutcome, Interpreter};
use crate::config::STRUCTURED_MAX_READ_BYTES;
use crate::models::ErrorKind;

const MAX_KEYS: usize = 50;

/// Reports the top-level shape of a config document.
#[derive(Debug, Clone, Default)]
pub struct StructuredConfigInterpreter;

impl StructuredConfigInterpreter {
    pub fn new() -> Self {
        Self
    }
}

impl Interpreter for StructuredConfigInterpreter {
    fn interpret(&self, input: &mut dyn Read, ctx: &InterpretContext<'_>) -> InterpretOutcome {
        let limit = ctx.config_usize("max_read_bytes", STRUCTURED_MAX_READ_BYTES);
        let prefix = read_prefix(input, limit)?;
        if prefix.truncated {
            return Err(InterpretError::new(
                ErrorKind::FileTooLarge,
                format!("document exceeds the {} byte parse limit", limit),
            ));
        }
        let text = String::from_utf8(prefix.bytes)
            .map_err(|e| InterpretError::new(ErrorKind::CorruptInput, e.to_string()))?;

        let (format, doc) = match ctx.descriptor.extension.as_str() {
            ".yaml" | ".yml" => ("yaml", parse_yaml(&text)?),
            ".toml" => ("toml", parse_toml(&text)?),
            _ => ("json", parse_json(&text)?),
        };

        let mut data = Map::new();
        data.insert("format".to_string(), json!(format));
        data.insert("root_type".to_string(), json!(type_name(&doc)));
        data.insert("depth".to_string(), json!(depth(&doc)));
        match &doc {
            Value::Object(map) => {
                let keys: Vec<&String> = map.keys().take(MAX_KEYS).collect();
                data.insert("key_count".to_string(), json!(map.len()));
                data.insert("top_level_keys".to_string(), json!(keys));
            }
            Value::Array(items) => {
                data.insert("item_count".to_string(), json!(items.len()));
            }
            _ => {}
        }
        Ok(Extracted::complete(data))
    }
}

fn parse_json(text: &str) -> Result<Value, InterpretError> {
    serde_json::from_str(text).map_err(|e| {
        let offset = line_col_offset(text, e.line(), e.column());
        InterpretError::new(ErrorKind::ParseError, e.to_string()).at(offset)
    })
}

fn parse_yaml(text: &str) -> Result<Value, InterpretError> {
    serde_yaml::from_str::<Value>(text).map_err(|e| {
        let err = InterpretError::new(ErrorKind::ParseError, e.to_string());
        match e.location() {
            Some(loc) => err.at(loc.index() as u64),
            None => err,
        }
    })
}

fn parse_toml(text: &str) -> Result<Value, InterpretError> {
    let table: toml::Table = toml::from_str(text).map_err(|e| {
        let err = InterpretError::new(ErrorKind::ParseError, e.message().to_string());
        match e.span() {
            Some(span) => err.at(span.start as u64),
            None => err,
        }
    })?;
    serde_json::to_value(table)
        .map_err(|e| InterpretError::new(ErrorKind::CorruptInput, e.to_string()))
}

/// Byte offset of a 1-based line/column pair.
fn line_col_offset(text: &str, line: usize, column: usize) -> u64 {
    let before: usize = text
        .split_inclusive('\n')
        .take(line.saturating_sub(1))
        .map(str::len)
        .sum();
    (before + column.saturating_sub(1)) as u64
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn depth(value: &Value) -> usize {
    match value {
        Value::Array(items) => 1 + items.iter().map(depth).max().unwrap_or(0),
        Value::Object(map) => 1 + map.values().map(depth).max().unwrap_or(0),
        _ => 0,
    }
}
