//! Streaming Jupyter notebook interpreter.
//!
//! Walks the document as events and keeps only counters plus two bounded
//! sample lists. Cell sources are buffered only while a sample list still has
//! room, and each buffer is capped, so peak memory stays flat no matter how
//! large the notebook is.

use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use std::io::Read;

use super::json_stream::{JsonEvent, JsonEvents, JsonStreamError, PathSegment};
use super::traits::{Extracted, InterpretContext, InterpretError, InterpretOutcome, Interpreter};
use crate::config::{NOTEBOOK_MAX_HEADINGS, NOTEBOOK_MAX_IMPORTS};
use crate::models::ErrorKind;

/// Events between budget checks.
const CHECK_INTERVAL: u64 = 4096;
/// Per-cell cap on buffered source.
const MAX_CELL_SOURCE_BYTES: usize = 16 * 1024;
/// Distinct cell types tracked before lumping into "other".
const MAX_CELL_TYPES: usize = 16;
const MIN_NBFORMAT: u64 = 4;

/// Extracts cell counts, language, headings and imports from `.ipynb`.
#[derive(Debug, Clone)]
pub struct NotebookInterpreter {
    max_headings: usize,
    max_imports: usize,
}

impl NotebookInterpreter {
    pub fn new() -> Self {
        Self {
            max_headings: NOTEBOOK_MAX_HEADINGS,
            max_imports: NOTEBOOK_MAX_IMPORTS,
        }
    }
}

impl Default for NotebookInterpreter {
    fn default() -> Self {
        Self::new()
    }
}

impl Interpreter for NotebookInterpreter {
    fn interpret(&self, input: &mut dyn Read, ctx: &InterpretContext<'_>) -> InterpretOutcome {
        let mut summary = NotebookSummary::new(
            ctx.config_usize("max_headings", self.max_headings),
            ctx.config_usize("max_imports", self.max_imports),
        );
        let mut events = JsonEvents::new(input);
        let mut seen = 0u64;

        while let Some(event) = events.next_event().map_err(parse_error)? {
            seen += 1;
            if seen % CHECK_INTERVAL == 0 {
                ctx.budget.check()?;
            }
            summary.observe(events.path(), event)?;
        }

        summary.finish()
    }
}

fn parse_error(err: JsonStreamError) -> InterpretError {
    let kind = match err {
        JsonStreamError::Io { .. } => ErrorKind::IoError,
        JsonStreamError::Syntax { .. } => ErrorKind::ParseError,
    };
    InterpretError::new(kind, err.to_string()).at(err.offset())
}

#[derive(Debug, Default)]
struct CellState {
    cell_type: Option<String>,
    source: String,
    collecting: bool,
}

impl CellState {
    fn push_source(&mut self, chunk: &str) {
        if !self.collecting {
            return;
        }
        let room = MAX_CELL_SOURCE_BYTES.saturating_sub(self.source.len());
        if chunk.len() <= room {
            self.source.push_str(chunk);
        } else {
            let mut cut = room;
            while !chunk.is_char_boundary(cut) {
                cut -= 1;
            }
            self.source.push_str(&chunk[..cut]);
        }
    }
}

struct NotebookSummary {
    max_headings: usize,
    max_imports: usize,
    started: bool,
    nbformat: Option<u64>,
    nbformat_minor: Option<u64>,
    language: Option<String>,
    has_cells: bool,
    cell_count: u64,
    cell_types: BTreeMap<String, u64>,
    headings: Vec<String>,
    imports: Vec<String>,
    current: Option<CellState>,
}

impl NotebookSummary {
    fn new(max_headings: usize, max_imports: usize) -> Self {
        Self {
            max_headings,
            max_imports,
            started: false,
            nbformat: None,
            nbformat_minor: None,
            language: None,
            has_cells: false,
            cell_count: 0,
            cell_types: BTreeMap::new(),
            headings: Vec::new(),
            imports: Vec::new(),
            current: None,
        }
    }

    fn samples_open(&self) -> bool {
        self.headings.len() < self.max_headings || self.imports.len() < self.max_imports
    }

    fn observe(&mut self, path: &[PathSegment], event: JsonEvent) -> Result<(), InterpretError> {
        if !self.started {
            if event != JsonEvent::StartObject {
                return Err(InterpretError::new(
                    ErrorKind::CorruptInput,
                    "notebook root is not a JSON object",
                ));
            }
            self.started = true;
            return Ok(());
        }

        match (path, event) {
            ([top], JsonEvent::Number(n)) if top.is_key("nbformat") => {
                self.nbformat = n.parse().ok();
            }
            ([top], JsonEvent::Number(n)) if top.is_key("nbformat_minor") => {
                self.nbformat_minor = n.parse().ok();
            }
            ([m, k, l], JsonEvent::String(lang))
                if m.is_key("metadata") && k.is_key("kernelspec") && l.is_key("language") =>
            {
                self.language = Some(lang);
            }
            ([m, k, l], JsonEvent::String(lang))
                if m.is_key("metadata") && k.is_key("language_info") && l.is_key("name") =>
            {
                self.language.get_or_insert(lang);
            }
            ([top], JsonEvent::StartArray) if top.is_key("cells") => {
                self.has_cells = true;
            }
            ([top, idx], JsonEvent::StartObject) if top.is_key("cells") && idx.is_index() => {
                self.current = Some(CellState {
                    collecting: self.samples_open(),
                    ..CellState::default()
                });
            }
            ([top, idx], JsonEvent::EndObject) if top.is_key("cells") && idx.is_index() => {
                if let Some(cell) = self.current.take() {
                    self.finish_cell(cell);
                }
            }
            ([top, idx, field], JsonEvent::String(t))
                if top.is_key("cells") && idx.is_index() && field.is_key("cell_type") =>
            {
                if let Some(cell) = self.current.as_mut() {
                    cell.cell_type = Some(t);
                }
            }
            ([top, idx, field], JsonEvent::String(s))
                if top.is_key("cells") && idx.is_index() && field.is_key("source") =>
            {
                if let Some(cell) = self.current.as_mut() {
                    cell.push_source(&s);
                }
            }
            ([top, idx, field, line], JsonEvent::String(s))
                if top.is_key("cells")
                    && idx.is_index()
                    && field.is_key("source")
                    && line.is_index() =>
            {
                if let Some(cell) = self.current.as_mut() {
                    cell.push_source(&s);
                }
            }
            _ => {}
        }
        Ok(())
    }

    fn finish_cell(&mut self, cell: CellState) {
        self.cell_count += 1;

        let cell_type = cell.cell_type.unwrap_or_else(|| "unknown".to_string());
        let bucket = if self.cell_types.contains_key(&cell_type)
            || self.cell_types.len() < MAX_CELL_TYPES
        {
            cell_type.clone()
        } else {
            "other".to_string()
        };
        *self.cell_types.entry(bucket).or_insert(0) += 1;

        if !cell.collecting {
            return;
        }
        match cell_type.as_str() {
            "markdown" => {
                for heading in extract_headings(&cell.source) {
                    if self.headings.len() >= self.max_headings {
                        break;
                    }
                    self.headings.push(heading);
                }
            }
            "code" => {
                for module in extract_imports(&cell.source) {
                    if self.imports.len() >= self.max_imports {
                        break;
                    }
                    if !self.imports.contains(&module) {
                        self.imports.push(module);
                    }
                }
            }
            _ => {}
        }
    }

    fn finish(self) -> InterpretOutcome {
        if !self.started {
            return Err(InterpretError::new(ErrorKind::CorruptInput, "empty notebook"));
        }
        let Some(version) = self.nbformat else {
            return Err(InterpretError::new(
                ErrorKind::CorruptInput,
                "notebook has no nbformat version",
            ));
        };
        if version < MIN_NBFORMAT {
            return Err(InterpretError::new(
                ErrorKind::UnsupportedVersion,
                format!("nbformat {} is not supported (need {}+)", version, MIN_NBFORMAT),
            ));
        }
        if !self.has_cells {
            return Err(InterpretError::new(
                ErrorKind::CorruptInput,
                "notebook has no cells array",
            ));
        }

        let mut data = Map::new();
        data.insert("cell_count".to_string(), json!(self.cell_count));
        data.insert("cell_types".to_string(), json!(self.cell_types));
        data.insert("headings".to_string(), json!(self.headings));
        data.insert("imports".to_string(), json!(self.imports));
        data.insert(
            "language".to_string(),
            self.language.map(Value::String).unwrap_or(Value::Null),
        );
        data.insert("nbformat".to_string(), json!(version));
        data.insert("nbformat_minor".to_string(), json!(self.nbformat_minor));
        Ok(Extracted::complete(data))
    }
}

/// Markdown ATX headings, without the leading hashes. Lines inside fenced
/// code blocks are not headings.
fn extract_headings(source: &str) -> impl Iterator<Item = String> + '_ {
    let mut fence: Option<(char, usize)> = None;
    source.lines().filter_map(move |line| {
        let trimmed = line.trim_start();
        if let Some((marker, len)) = fence_marker(trimmed) {
            match fence {
                None => fence = Some((marker, len)),
                Some((open, open_len)) if open == marker && len >= open_len => fence = None,
                Some(_) => {}
            }
            return None;
        }
        if fence.is_some() {
            return None;
        }

        let text = trimmed.strip_prefix('#')?;
        let text = text.trim_start_matches('#');
        if !text.is_empty() && !text.starts_with(char::is_whitespace) {
            return None;
        }
        let text = text.trim();
        (!text.is_empty()).then(|| text.to_string())
    })
}

/// A run of three or more backticks or tildes opening a line.
fn fence_marker(line: &str) -> Option<(char, usize)> {
    let marker = line.chars().next().filter(|c| *c == '`' || *c == '~')?;
    let len = line.chars().take_while(|c| *c == marker).count();
    (len >= 3).then_some((marker, len))
}

/// Top-level module names from `import` and `from ... import` lines.
fn extract_imports(source: &str) -> Vec<String> {
    let mut modules = Vec::new();
    for line in source.lines() {
        let line = line.trim();
        if let Some(rest) = line.strip_prefix("import ") {
            for part in rest.split(',') {
                if let Some(name) = part.split_whitespace().next() {
                    modules.push(name.to_string());
                }
            }
        } else if let Some(rest) = line.strip_prefix("from ") {
            let mut parts = rest.split_whitespace();
            if let (Some(name), Some("import")) = (parts.next(), parts.next()) {
                modules.push(name.to_string());
            }
        }
    }
    modules
}
