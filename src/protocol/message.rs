use super::{Action, AgentKind, ProtocolError};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Request envelope. Built once per call and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct McpMessage {
    target_agent: AgentKind,
    action: Action,
    #[serde(default)]
    context: Map<String, Value>,
}

impl McpMessage {
    /// The target is derived from the action, so a mismatched pair cannot be built.
    pub fn new(action: Action, context: Map<String, Value>) -> Self {
        Self {
            target_agent: action.owner(),
            action,
            context,
        }
    }

    pub fn with_payload<T: Serialize>(action: Action, payload: &T) -> Result<Self, ProtocolError> {
        let value = serde_json::to_value(payload)
            .map_err(|source| ProtocolError::Encode { action, source })?;
        let context = match value {
            Value::Object(map) => map,
            other => Map::from_iter([("value".to_string(), other)]),
        };
        Ok(Self::new(action, context))
    }

    /// Parses string routing fields, rejecting unknown or mismatched pairs.
    pub fn from_wire(
        target_agent: &str,
        action: &str,
        context: Map<String, Value>,
    ) -> Result<Self, ProtocolError> {
        let agent = AgentKind::parse(target_agent)?;
        let action = Action::parse(action)?;
        if action.owner() != agent {
            return Err(ProtocolError::ActionNotOwned { agent, action });
        }
        Ok(Self::new(action, context))
    }

    pub fn target_agent(&self) -> AgentKind {
        self.target_agent
    }

    pub fn action(&self) -> Action {
        self.action
    }

    pub fn context(&self) -> &Map<String, Value> {
        &self.context
    }

    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, ProtocolError> {
        serde_json::from_value(Value::Object(self.context.clone())).map_err(|source| {
            ProtocolError::Decode {
                action: self.action,
                source,
            }
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    Timeout,
    Transport,
    UnknownRoute,
    InvalidRequest,
    UnsupportedFormat,
    MalformedMetadata,
    MissingInput,
    ConversionFailed,
    OutputUnreadable,
    ValidatorFailed,
    Cancelled,
    Internal,
}

/// How the orchestrator should react to a failed call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Retried once automatically.
    Transport,
    /// Resolved by asking the user to pick a format.
    FormatIdentity,
    /// Resolved through metadata collection or the correction loop.
    ConversionData,
    /// Surfaced to the user; the session stays resumable.
    Fatal,
}

impl ErrorCode {
    pub fn category(self) -> ErrorCategory {
        match self {
            Self::Timeout | Self::Transport => ErrorCategory::Transport,
            Self::UnsupportedFormat => ErrorCategory::FormatIdentity,
            Self::MalformedMetadata | Self::ConversionFailed => ErrorCategory::ConversionData,
            Self::UnknownRoute
            | Self::InvalidRequest
            | Self::MissingInput
            | Self::OutputUnreadable
            | Self::ValidatorFailed
            | Self::Cancelled
            | Self::Internal => ErrorCategory::Fatal,
        }
    }

    pub fn is_retryable(self) -> bool {
        self.category() == ErrorCategory::Transport
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let raw = match self {
            Self::Timeout => "timeout",
            Self::Transport => "transport",
            Self::UnknownRoute => "unknown_route",
            Self::InvalidRequest => "invalid_request",
            Self::UnsupportedFormat => "unsupported_format",
            Self::MalformedMetadata => "malformed_metadata",
            Self::MissingInput => "missing_input",
            Self::ConversionFailed => "conversion_failed",
            Self::OutputUnreadable => "output_unreadable",
            Self::ValidatorFailed => "validator_failed",
            Self::Cancelled => "cancelled",
            Self::Internal => "internal",
        };
        f.write_str(raw)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub code: ErrorCode,
    pub message: String,
    #[serde(default)]
    pub context: Map<String, Value>,
}

impl ErrorPayload {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            context: Map::new(),
        }
    }

    pub fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.context.insert(key.to_string(), value.into());
        self
    }

    pub fn context_str(&self, key: &str) -> Option<&str> {
        self.context.get(key).and_then(Value::as_str)
    }
}

impl std::fmt::Display for ErrorPayload {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

/// Response envelope. `result` is present iff `success`; `error` iff not.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct McpResponse {
    success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    error: Option<ErrorPayload>,
}

impl McpResponse {
    pub fn ok(result: Value) -> Self {
        Self {
            success: true,
            result: Some(result),
            error: None,
        }
    }

    pub fn failure(error: ErrorPayload) -> Self {
        Self {
            success: false,
            result: None,
            error: Some(error),
        }
    }

    pub fn is_success(&self) -> bool {
        self.success
    }

    pub fn result(&self) -> Option<&Value> {
        self.result.as_ref()
    }

    pub fn error(&self) -> Option<&ErrorPayload> {
        self.error.as_ref()
    }

    pub fn into_result(self) -> Result<Value, ErrorPayload> {
        match (self.result, self.error) {
            (Some(result), None) if self.success => Ok(result),
            (_, Some(error)) => Err(error),
            _ => Err(ErrorPayload::new(
                ErrorCode::Internal,
                "response envelope violates the success/result/error contract",
            )),
        }
    }
}
