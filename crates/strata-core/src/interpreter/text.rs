//! Plain text interpreter.

use serde_json::{json, Map};
use std::io::{BufRead, BufReader, Read};

use super::traits::{Extracted, InterpretContext, InterpretError, InterpretOutcome, Interpreter};
use crate::config::{NOTEBOOK_MAX_HEADINGS, TEXT_MAX_LINES, TEXT_MAX_LINE_BYTES};

const LINE_CHECK_INTERVAL: usize = 1024;
const MAX_TITLE_CHARS: usize = 120;

/// Line, word and character counts, the first non-empty line, and the first
/// few markdown headings.
#[derive(Debug, Clone, Default)]
pub struct PlainTextInterpreter;

impl PlainTextInterpreter {
    pub fn new() -> Self {
        Self
    }
}

impl Interpreter for PlainTextInterpreter {
    fn interpret(&self, input: &mut dyn Read, ctx: &InterpretContext<'_>) -> InterpretOutcome {
        let max_lines = ctx.config_usize("max_lines", TEXT_MAX_LINES);
        let max_line_bytes = ctx.config_usize("max_line_bytes", TEXT_MAX_LINE_BYTES).max(1);
        let mut reader = BufReader::new(input);
        let mut buf = Vec::new();

        let mut lines = 0usize;
        let mut words = 0u64;
        let mut chars = 0u64;
        let mut consumed = 0u64;
        let mut skipped = 0u64;
        let mut clipped = 0usize;
        let mut title: Option<String> = None;
        let mut headings: Vec<String> = Vec::new();
        let markdown = ctx.descriptor.extension == ".md";
        let mut more = false;

        loop {
            buf.clear();
            let n = (&mut reader)
                .take(max_line_bytes as u64)
                .read_until(b'\n', &mut buf)
                .map_err(InterpretError::io)?;
            if n == 0 {
                break;
            }
            if lines >= max_lines {
                more = true;
                break;
            }
            consumed += n as u64;
            lines += 1;
            if n == max_line_bytes && buf.last() != Some(&b'\n') {
                let rest = skip_line(&mut reader, ctx)?;
                if rest > 0 {
                    skipped += rest;
                    clipped += 1;
                }
            }

            let line = String::from_utf8_lossy(&buf);
            words += line.split_whitespace().count() as u64;
            chars += line.trim_end_matches(['\n', '\r']).chars().count() as u64;
            if title.is_none() && !line.trim().is_empty() {
                title = Some(line.trim().chars().take(MAX_TITLE_CHARS).collect());
            }
            if markdown && headings.len() < NOTEBOOK_MAX_HEADINGS {
                if let Some(heading) = markdown_heading(&line) {
                    headings.push(heading);
                }
            }
            if lines % LINE_CHECK_INTERVAL == 0 {
                ctx.budget.check()?;
            }
        }

        let mut data = Map::new();
        data.insert("char_count".to_string(), json!(chars));
        if markdown {
            data.insert("headings".to_string(), json!(headings));
        }
        data.insert("line_count".to_string(), json!(lines));
        data.insert("title".to_string(), json!(title));
        data.insert("word_count".to_string(), json!(words));

        if !more && clipped == 0 {
            return Ok(Extracted::complete(data));
        }
        let total = ctx.descriptor.size.max(consumed + skipped);
        let coverage = if total == 0 { 1.0 } else { consumed as f64 / total as f64 };
        let mut extracted = Extracted::partial(data, coverage);
        if more {
            extracted = extracted.with_warning(format!("stopped after {} lines", max_lines));
        }
        if clipped > 0 {
            extracted = extracted.with_warning(format!(
                "{} lines were cut at {} bytes",
                clipped, max_line_bytes
            ));
        }
        Ok(extracted)
    }
}

/// Discard input through the next newline, returning the bytes dropped
/// before it.
fn skip_line<R: BufRead>(reader: &mut R, ctx: &InterpretContext<'_>) -> Result<u64, InterpretError> {
    let mut skipped = 0u64;
    loop {
        let chunk = reader.fill_buf().map_err(InterpretError::io)?;
        if chunk.is_empty() {
            return Ok(skipped);
        }
        let len = chunk.len();
        if let Some(i) = chunk.iter().position(|&b| b == b'\n') {
            reader.consume(i + 1);
            return Ok(skipped + i as u64);
        }
        reader.consume(len);
        skipped += len as u64;
        ctx.budget.check()?;
    }
}

fn markdown_heading(line: &str) -> Option<String> {
    let text = line.trim_start().strip_prefix('#')?.trim_start_matches('#');
    if !text.is_empty() && !text.starts_with(char::is_whitespace) {
        return None;
    }
    let text = text.trim();
    (!text.is_empty()).then(|| text.chars().take(MAX_TITLE_CHARS).collect())
}
