//! Data models shared by every stage of the pipeline.

mod commit;
mod descriptor;
mod result;
mod session;

pub use commit::{Discrepancy, GraphCommitRecord, ProjectionState, VerificationReport};
pub use descriptor::{normalize_extension, FileDescriptor};
pub use result::{ErrorKind, InterpretationResult, Issue, ResultStatus, Severity};
pub use session::{ScanRow, ScanSession, SessionStatus};
