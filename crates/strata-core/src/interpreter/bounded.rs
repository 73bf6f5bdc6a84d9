//! Bounded reads for interpreters that need the whole prefix in memory.

use std::io::Read;

use super::traits::InterpretError;

/// At most `limit` bytes of `input`, and whether more remained.
pub(crate) struct Prefix {
    pub bytes: Vec<u8>,
    pub truncated: bool,
}

pub(crate) fn read_prefix(input: &mut dyn Read, limit: usize) -> Result<Prefix, InterpretError> {
    let mut bytes = Vec::with_capacity(limit.min(64 * 1024));
    let mut handle = input.take(limit as u64 + 1);
    handle.read_to_end(&mut bytes).map_err(InterpretError::io)?;

    let truncated = bytes.len() > limit;
    bytes.truncate(limit);
    Ok(Prefix { bytes, truncated })
}

/// Fraction of the file covered by `read` bytes.
pub(crate) fn coverage(read: u64, total: u64) -> f64 {
    if total == 0 {
        1.0
    } else {
        (read as f64 / total as f64).min(1.0)
    }
}
