use crate::metadata::Metadata;
use crate::protocol::{FieldRequest, ValidationResult};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NoticeKind {
    Status,
    Detection,
    Validation,
    Correction,
    NoProgress,
    Warning,
    Outcome,
}

impl NoticeKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Status => "status",
            Self::Detection => "detection",
            Self::Validation => "validation",
            Self::Correction => "correction",
            Self::NoProgress => "no_progress",
            Self::Warning => "warning",
            Self::Outcome => "outcome",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notice {
    pub kind: NoticeKind,
    pub message: String,
}

impl Notice {
    pub fn new(kind: NoticeKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionKind {
    Correct,
    AcceptAsIs,
    Abandon,
    Override,
}

impl DecisionKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Correct => "correct",
            Self::AcceptAsIs => "accept_as_is",
            Self::Abandon => "abandon",
            Self::Override => "override",
        }
    }
}

impl std::fmt::Display for DecisionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    Correct,
    AcceptAsIs,
    Abandon,
    /// Manual field overrides, applied as user input to the next cycle.
    Override(Metadata),
}

impl Decision {
    pub fn kind(&self) -> DecisionKind {
        match self {
            Self::Correct => DecisionKind::Correct,
            Self::AcceptAsIs => DecisionKind::AcceptAsIs,
            Self::Abandon => DecisionKind::Abandon,
            Self::Override(_) => DecisionKind::Override,
        }
    }
}

/// The conversational side of a session. Every question the workflow asks
/// goes through here, so the state machine stays independent of how the
/// user is reached.
pub trait UserChannel {
    fn notify(&mut self, notice: &Notice);

    /// `None` leaves the session waiting for a format.
    fn choose_format(&mut self, candidates: &[String]) -> Option<String>;

    fn request_metadata(&mut self, requests: &[FieldRequest]) -> Metadata;

    /// Must return one of `options`.
    fn decide(&mut self, report: &ValidationResult, options: &[DecisionKind]) -> Decision;

    fn provide_corrections(&mut self, requests: &[FieldRequest]) -> Metadata;
}
