//! Typed request/response envelopes exchanged between the orchestrator and agents.
//!
//! Routing is a closed table: every [`Action`] has exactly one owning
//! [`AgentKind`], and wire strings are parsed into these enums before dispatch.

pub mod agent;
pub mod error;
pub mod message;
pub mod payloads;
pub mod router;

pub use agent::{Action, AgentKind};
pub use error::ProtocolError;
pub use message::{ErrorCategory, ErrorCode, ErrorPayload, McpMessage, McpResponse};
pub use payloads::{
    AnalyzeCorrectionsRequest, ApplyCorrectionsRequest, ConversionOutcome, CorrectionContext,
    CorrectionOutcome, CorrectionStatus, DetectFormatRequest, DetectionMethod, FieldRequest,
    FormatConfidence, FormatDetection, issue_keys, IssueKey, LifecycleStatus, OverallStatus,
    RunConversionRequest, RunValidationRequest, Severity, ValidationIssue, ValidationResult,
    VersionedArtifact,
};
pub use router::{
    decode_request, encode_result, AgentHandler, CallContext, MessageRouter, MessageRouterBuilder,
};
