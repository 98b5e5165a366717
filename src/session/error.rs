use super::Phase;

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("session `{session_id}` not found")]
    UnknownSession { session_id: String },
    #[error("session `{session_id}` is already checked out by another writer")]
    SessionBusy { session_id: String },
    #[error("session `{session_id}` already exists")]
    DuplicateSession { session_id: String },
    #[error("phase transition `{from}` -> `{to}` is invalid")]
    InvalidTransition { from: Phase, to: Phase },
    #[error("audit trail violation for session `{session_id}`: {reason}")]
    AuditTrail { session_id: String, reason: String },
    #[error("lease for session `{session_id}` does not match the committed state")]
    LeaseMismatch { session_id: String },
    #[error("invalid session id: {0}")]
    InvalidId(String),
    #[error("io error at {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("json error at {path}: {source}")]
    Json {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}

pub(crate) fn io_error(path: &std::path::Path, source: std::io::Error) -> SessionError {
    SessionError::Io {
        path: path.display().to_string(),
        source,
    }
}

pub(crate) fn json_error(path: &std::path::Path, source: serde_json::Error) -> SessionError {
    SessionError::Json {
        path: path.display().to_string(),
        source,
    }
}
