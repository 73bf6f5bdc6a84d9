//! Local filesystem enumerator.

use ignore::WalkBuilder;
use sha2::{Digest, Sha256};
use std::fs::{self, File};
use std::io;
use std::path::Path;
use std::time::UNIX_EPOCH;

use super::{EnumerateError, Enumerator, FileIter, ScanTarget};
use crate::models::FileDescriptor;

pub const LOCAL_PROVIDER_ID: &str = "local";

/// Walks a local directory, honouring `.gitignore` and skipping hidden
/// entries.
#[derive(Debug, Clone)]
pub struct LocalEnumerator {
    checksums: bool,
}

impl LocalEnumerator {
    pub fn new() -> Self {
        Self { checksums: false }
    }

    /// Hash every file's contents so dedupe survives mtime changes.
    pub fn with_checksums(mut self, enabled: bool) -> Self {
        self.checksums = enabled;
        self
    }

    fn describe(&self, path: &Path) -> Result<FileDescriptor, EnumerateError> {
        let metadata = fs::metadata(path).map_err(|e| io_error(path, e))?;
        let modified = metadata
            .modified()
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map(|d| d.as_secs() as i64)
            .unwrap_or(0);

        let fd = FileDescriptor::new(path.to_string_lossy().into_owned(), metadata.len(), modified);
        if self.checksums {
            Ok(fd.with_checksum(compute_hash(path)?))
        } else {
            Ok(fd)
        }
    }
}

impl Default for LocalEnumerator {
    fn default() -> Self {
        Self::new()
    }
}

impl Enumerator for LocalEnumerator {
    fn provider_id(&self) -> &str {
        LOCAL_PROVIDER_ID
    }

    fn iter_files<'a>(&'a self, target: &ScanTarget) -> Result<FileIter<'a>, EnumerateError> {
        let root = Path::new(&target.root);
        let root = fs::canonicalize(root).map_err(|e| io_error(root, e))?;
        if !root.is_dir() {
            return Err(EnumerateError::NotFound(format!(
                "{} is not a directory",
                root.display()
            )));
        }

        let walker = WalkBuilder::new(&root)
            .hidden(true)
            .git_ignore(true)
            .max_depth(if target.recursive { None } else { Some(1) })
            .sort_by_file_name(|a, b| a.cmp(b))
            .build();

        let files = walker.filter_map(move |entry| match entry {
            Ok(entry) => {
                let is_file = entry.file_type().is_some_and(|t| t.is_file());
                is_file.then(|| self.describe(entry.path()))
            }
            Err(e) => Some(Err(walk_error(e))),
        });
        Ok(Box::new(files))
    }
}

/// SHA-256 of the file contents, streamed.
fn compute_hash(path: &Path) -> Result<String, EnumerateError> {
    let mut file = File::open(path).map_err(|e| io_error(path, e))?;
    let mut hasher = Sha256::new();
    io::copy(&mut file, &mut hasher).map_err(|e| io_error(path, e))?;
    Ok(hex::encode(hasher.finalize()))
}

fn io_error(path: &Path, err: io::Error) -> EnumerateError {
    match err.kind() {
        io::ErrorKind::NotFound => EnumerateError::NotFound(path.display().to_string()),
        io::ErrorKind::PermissionDenied => {
            EnumerateError::PermissionDenied(path.display().to_string())
        }
        _ => EnumerateError::Io(err),
    }
}

fn walk_error(err: ignore::Error) -> EnumerateError {
    match err.io_error().map(io::Error::kind) {
        Some(io::ErrorKind::PermissionDenied) => EnumerateError::PermissionDenied(err.to_string()),
        Some(io::ErrorKind::NotFound) => EnumerateError::NotFound(err.to_string()),
        _ => EnumerateError::Transient(err.to_string()),
    }
}
