//! File enumeration.
//!
//! An [`Enumerator`] lists the files under a target as a lazy, finite,
//! non-restartable iterator. [`stream_batches`] drives one on a blocking
//! thread and hands batches to async code through a bounded channel, so a
//! slow store applies backpressure to the walk.

mod error;
mod local;

pub use error::EnumerateError;
pub use local::LocalEnumerator;

use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::interpreter::CancelToken;
use crate::models::FileDescriptor;

/// Batches buffered between the walker and the store.
const CHANNEL_CAPACITY: usize = 4;

/// What to enumerate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanTarget {
    pub root: String,
    pub recursive: bool,
}

impl ScanTarget {
    pub fn new(root: impl Into<String>, recursive: bool) -> Self {
        Self {
            root: root.into(),
            recursive,
        }
    }
}

pub type FileIter<'a> =
    Box<dyn Iterator<Item = Result<FileDescriptor, EnumerateError>> + Send + 'a>;

/// Source of file descriptors: local disk, or a remote storage provider.
pub trait Enumerator: Send + Sync {
    /// Stable id recorded on every session this enumerator produces.
    fn provider_id(&self) -> &str;

    /// Files under `target`. Fails up front when the target itself is
    /// unusable; per-file problems are yielded as `Err` items.
    fn iter_files<'a>(&'a self, target: &ScanTarget) -> Result<FileIter<'a>, EnumerateError>;
}

/// One message from the walker thread.
#[derive(Debug)]
pub enum EnumerationEvent {
    Batch(Vec<FileDescriptor>),
    /// A file that could not be described; the walk continues.
    Skipped(EnumerateError),
}

/// Run `enumerator` on a blocking thread, sending batches of `batch_size`.
///
/// The join handle yields the number of descriptors sent, or the error that
/// prevented the walk from starting. Dropping the receiver or cancelling
/// stops the walk.
pub fn stream_batches(
    enumerator: Arc<dyn Enumerator>,
    target: ScanTarget,
    batch_size: usize,
    cancel: CancelToken,
) -> (
    mpsc::Receiver<EnumerationEvent>,
    JoinHandle<Result<u64, EnumerateError>>,
) {
    let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
    let batch_size = batch_size.max(1);

    let handle = tokio::task::spawn_blocking(move || {
        let files = enumerator.iter_files(&target)?;
        let mut batch = Vec::with_capacity(batch_size);
        let mut sent = 0u64;

        for item in files {
            if cancel.is_canceled() {
                debug!("Enumeration of {} canceled", target.root);
                return Ok(sent);
            }
            match item {
                Ok(fd) => {
                    batch.push(fd);
                    if batch.len() >= batch_size {
                        sent += batch.len() as u64;
                        let full = std::mem::replace(&mut batch, Vec::with_capacity(batch_size));
                        if tx.blocking_send(EnumerationEvent::Batch(full)).is_err() {
                            return Ok(sent);
                        }
                    }
                }
                Err(e) => {
                    warn!("Skipping entry under {}: {}", target.root, e);
                    if tx.blocking_send(EnumerationEvent::Skipped(e)).is_err() {
                        return Ok(sent);
                    }
                }
            }
        }

        if !batch.is_empty() {
            sent += batch.len() as u64;
            let _ = tx.blocking_send(EnumerationEvent::Batch(batch));
        }
        Ok(sent)
    });

    (rx, handle)
}
