use crate::collaborators::CollaboratorError;
use crate::metadata::MetadataError;
use crate::protocol::{ErrorCode, ErrorPayload, VersionedArtifact};
use serde_json::Value;

#[derive(Debug, thiserror::Error)]
pub enum ConversionError {
    #[error("input path {path} does not exist")]
    MissingInput { path: String },
    #[error("no prior output at {path} to version")]
    MissingOutput { path: String },
    #[error("format `{format}` is not supported")]
    UnsupportedFormat {
        format: String,
        supported: Vec<String>,
    },
    #[error("invalid metadata: {0}")]
    InvalidMetadata(String),
    #[error(transparent)]
    MalformedMetadata(#[from] MetadataError),
    #[error("correction attempts are numbered from 1, got {0}")]
    InvalidAttempt(u32),
    #[error("conversion failed: {0}")]
    Library(#[source] CollaboratorError),
    #[error("conversion was cancelled before its output was published")]
    Cancelled,
    /// Reconversion failed after the prior output was already versioned.
    #[error("{source}")]
    AfterBackup {
        backup: VersionedArtifact,
        #[source]
        source: Box<ConversionError>,
    },
    #[error("io error at {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

pub(crate) fn io_error(path: &std::path::Path, source: std::io::Error) -> ConversionError {
    ConversionError::Io {
        path: path.display().to_string(),
        source,
    }
}

impl ConversionError {
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::MissingInput { .. } | Self::MissingOutput { .. } => ErrorCode::MissingInput,
            Self::UnsupportedFormat { .. } => ErrorCode::UnsupportedFormat,
            Self::InvalidMetadata(_) | Self::InvalidAttempt(_) => ErrorCode::InvalidRequest,
            Self::MalformedMetadata(_) => ErrorCode::MalformedMetadata,
            Self::Library(CollaboratorError::Timeout { .. }) => ErrorCode::Timeout,
            Self::Library(CollaboratorError::Unavailable { .. }) => ErrorCode::Transport,
            Self::Library(_) | Self::Io { .. } => ErrorCode::ConversionFailed,
            Self::Cancelled => ErrorCode::Cancelled,
            Self::AfterBackup { source, .. } => source.code(),
        }
    }

    /// Structured payload carrying the identifiers a user needs to act.
    pub fn to_payload(&self) -> ErrorPayload {
        if let Self::AfterBackup { backup, source } = self {
            let payload = source.to_payload();
            return match serde_json::to_value(backup) {
                Ok(value) => payload.with("backup", value),
                Err(_) => payload,
            };
        }
        let payload = ErrorPayload::new(self.code(), self.to_string());
        match self {
            Self::MissingInput { path } | Self::MissingOutput { path } => {
                payload.with("path", path.as_str())
            }
            Self::UnsupportedFormat { format, supported } => payload
                .with("format", format.as_str())
                .with(
                    "supported",
                    Value::from(supported.iter().map(String::as_str).collect::<Vec<_>>()),
                ),
            Self::MalformedMetadata(err) => {
                let payload = payload
                    .with("field", err.field.as_str())
                    .with("explanation", err.explanation.as_str());
                match &err.suggestion {
                    Some(suggestion) => payload.with("suggestion", suggestion.as_str()),
                    None => payload,
                }
            }
            _ => payload,
        }
    }
}
