use crate::protocol::{Action, ErrorPayload, OverallStatus, ProtocolError};
use crate::session::{Phase, SessionError};

#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    #[error("`{action}` failed: {payload}")]
    Agent {
        action: Action,
        payload: ErrorPayload,
    },
    #[error("`{action}` is unavailable after one retry: {payload}")]
    AgentUnavailable {
        action: Action,
        payload: ErrorPayload,
    },
    #[error("`{action}` returned an unexpected result: {source}")]
    UnexpectedResult {
        action: Action,
        #[source]
        source: serde_json::Error,
    },
    #[error("accept-as-is is not allowed while validation status is {status}")]
    AcceptAsIsRejected { status: OverallStatus },
    #[error("decision `{decision}` is not available in phase `{phase}`")]
    InvalidDecision { phase: Phase, decision: String },
    #[error("a format must be chosen from: {}", candidates.join(", "))]
    FormatSelectionRequired { candidates: Vec<String> },
    #[error("required metadata is still missing: {}", fields.join(", "))]
    MetadataIncomplete { fields: Vec<String> },
    #[error("invalid metadata: {0}")]
    InvalidMetadata(String),
    #[error("session is in phase `{phase}`: {reason}")]
    InvalidState { phase: Phase, reason: String },
    #[error("session id generation failed: {0}")]
    Id(String),
}

impl OrchestratorError {
    /// Errors after which `run` can be called again once the cause is resolved.
    pub fn is_resumable(&self) -> bool {
        !matches!(self, Self::Session(_) | Self::Id(_))
    }
}
