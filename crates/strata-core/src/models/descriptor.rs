//! File descriptors produced by enumerators.

use serde::{Deserialize, Serialize};
use std::path::Path;

/// One enumerated file. Immutable once produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileDescriptor {
    /// Absolute path.
    pub path: String,
    /// Size in bytes.
    pub size: u64,
    /// Last-modified time, unix seconds.
    pub modified: i64,
    /// Lower-case, dot-prefixed extension; empty when the file has none.
    pub extension: String,
    /// Opaque id assigned by the provider.
    pub provider_file_id: String,
    /// SHA-256 of the contents, hex encoded, when computed.
    pub checksum: Option<String>,
}

impl FileDescriptor {
    /// Create a descriptor; the extension is derived from the path and the
    /// provider id defaults to the path.
    pub fn new(path: impl Into<String>, size: u64, modified: i64) -> Self {
        let path = path.into();
        let extension = Path::new(&path)
            .extension()
            .and_then(|e| e.to_str())
            .map(normalize_extension)
            .unwrap_or_default();

        Self {
            provider_file_id: path.clone(),
            path,
            size,
            modified,
            extension,
            checksum: None,
        }
    }

    /// Set the provider-assigned id.
    pub fn with_provider_id(mut self, id: impl Into<String>) -> Self {
        self.provider_file_id = id.into();
        self
    }

    /// Set the content checksum.
    pub fn with_checksum(mut self, checksum: impl Into<String>) -> Self {
        self.checksum = Some(checksum.into());
        self
    }

    /// Dedupe key for the contents: the checksum when known, otherwise
    /// `size:mtime`, which is stable for an unchanged file.
    pub fn checksum_key(&self) -> String {
        match &self.checksum {
            Some(sum) => sum.clone(),
            None => format!("{}:{}", self.size, self.modified),
        }
    }

    /// File name component.
    pub fn file_name(&self) -> &str {
        Path::new(&self.path)
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("")
    }

    /// Parent directory, or empty for a bare name.
    pub fn parent_dir(&self) -> String {
        Path::new(&self.path)
            .parent()
            .map(|p| p.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}

/// Normalize an extension to lower case with a leading dot.
///
/// Accepts `"PY"`, `"py"` or `".Py"`; returns `""` for blank input.
pub fn normalize_extension(ext: &str) -> String {
    let trimmed = ext.trim().trim_start_matches('.');
    if trimmed.is_empty() {
        String::new()
    } else {
        format!(".{}", trimmed.to_lowercase())
    }
}
