//! Delimited text interpreter (`.csv`, `.tsv`).

use serde_json::{json, Map};
use std::io::Read;

use super::traits::{Extracted, InterpretContext, InterpretError, InterpretOutcome, Interpreter};
use crate::config::TABULAR_MAX_ROWS;
use crate::models::ErrorKind;

const ROW_CHECK_INTERVAL: u64 = 1024;

/// Reports header, column count and row count.
///
/// Stops after `max_rows` data rows and reports a partial result whose
/// coverage is the byte fraction consumed.
#[derive(Debug, Clone, Default)]
pub struct TabularInterpreter;

impl TabularInterpreter {
    pub fn new() -> Self {
        Self
    }
}

impl Interpreter for TabularInterpreter {
    fn interpret(&self, input: &mut dyn Read, ctx: &InterpretContext<'_>) -> InterpretOutcome {
        let delimiter = if ctx.descriptor.extension == ".tsv" {
            b'\t'
        } else {
            b','
        };
        let max_rows = ctx.config_u64("max_rows", TABULAR_MAX_ROWS as u64);

        let mut reader = csv::ReaderBuilder::new()
            .delimiter(delimiter)
            .flexible(true)
            .from_reader(input);

        let headers: Vec<String> = reader
            .headers()
            .map_err(csv_error)?
            .iter()
            .map(|h| h.trim().to_string())
            .collect();

        let mut rows = 0u64;
        let mut ragged = 0u64;
        let mut record = csv::ByteRecord::new();
        let mut stopped_early = false;

        loop {
            if rows >= max_rows {
                stopped_early = !reader.is_done() && has_more(&mut reader, &mut record)?;
                break;
            }
            if !reader.read_byte_record(&mut record).map_err(csv_error)? {
                break;
            }
            rows += 1;
            if record.len() != headers.len() {
                ragged += 1;
            }
            if rows % ROW_CHECK_INTERVAL == 0 {
                ctx.budget.check()?;
            }
        }

        let mut data = Map::new();
        data.insert("column_count".to_string(), json!(headers.len()));
        data.insert("columns".to_string(), json!(headers));
        data.insert("delimiter".to_string(), json!((delimiter as char).to_string()));
        data.insert("ragged_rows".to_string(), json!(ragged));
        data.insert("row_count".to_string(), json!(rows));

        if stopped_early {
            let consumed = reader.position().byte();
            let total = ctx.descriptor.size.max(consumed);
            let coverage = if total == 0 { 1.0 } else { consumed as f64 / total as f64 };
            Ok(Extracted::partial(data, coverage)
                .with_warning(format!("stopped after {} rows", max_rows)))
        } else {
            Ok(Extracted::complete(data))
        }
    }
}

fn has_more<R: Read>(
    reader: &mut csv::Reader<R>,
    record: &mut csv::ByteRecord,
) -> Result<bool, InterpretError> {
    reader.read_byte_record(record).map_err(csv_error)
}

fn csv_error(err: csv::Error) -> InterpretError {
    let offset = err.position().map(|p| p.byte());
    let kind = match err.kind() {
        csv::ErrorKind::Io(_) => ErrorKind::IoError,
        _ => ErrorKind::ParseError,
    };
    let mut out = InterpretError::new(kind, err.to_string());
    out.offset = offset;
    out
}
