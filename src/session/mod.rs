//! Per-session workflow state, its phase machine, and the registry that
//! serializes writers while serving lock-free snapshots to readers.

pub mod error;
pub mod phase;
pub mod state;
pub mod store;

pub use error::SessionError;
pub use phase::Phase;
pub use state::{
    correction_checksum_label, ChecksumEntry, DetectedFormat, LogEntry, PendingCorrection,
    WorkflowState, ORIGINAL_CHECKSUM_LABEL,
};
pub use store::{SessionLease, SessionStore};
