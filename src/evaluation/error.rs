use crate::collaborators::CollaboratorError;
use crate::protocol::{ErrorCode, ErrorPayload};

#[derive(Debug, thiserror::Error)]
pub enum EvaluationError {
    #[error("output file {path} is unreadable: {reason}")]
    OutputUnreadable { path: String, reason: String },
    #[error("validator failed: {0}")]
    Validator(#[source] CollaboratorError),
    #[error("invalid metadata: {0}")]
    InvalidMetadata(String),
    #[error("validation was cancelled")]
    Cancelled,
}

impl EvaluationError {
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::OutputUnreadable { .. } => ErrorCode::OutputUnreadable,
            Self::Validator(CollaboratorError::Timeout { .. }) => ErrorCode::Timeout,
            Self::Validator(CollaboratorError::Unavailable { .. }) => ErrorCode::Transport,
            Self::Validator(_) => ErrorCode::ValidatorFailed,
            Self::InvalidMetadata(_) => ErrorCode::InvalidRequest,
            Self::Cancelled => ErrorCode::Cancelled,
        }
    }

    pub fn to_payload(&self) -> ErrorPayload {
        let payload = ErrorPayload::new(self.code(), self.to_string());
        match self {
            Self::OutputUnreadable { path, .. } => payload.with("path", path.as_str()),
            _ => payload,
        }
    }
}
