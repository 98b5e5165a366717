//! Evaluation agent: runs the external validator over a converted file and
//! derives the correction context for the next cycle.

pub mod corrections;
pub mod error;
pub mod status;

pub use corrections::{analyze, field_for_issue};
pub use error::EvaluationError;
pub use status::{build_result, classify, count_by_severity, lifecycle};

use crate::collaborators::{GuardedCompletion, Validator};
use crate::metadata::validate_flat;
use crate::protocol::{
    decode_request, encode_result, Action, AgentHandler, AgentKind, AnalyzeCorrectionsRequest,
    CallContext, CorrectionContext, ErrorCode, ErrorPayload, McpMessage, RunValidationRequest,
    ValidationResult,
};
use serde_json::Value;
use std::fs::File;
use std::sync::Arc;

pub struct EvaluationAgent {
    validator: Arc<dyn Validator>,
    completion: GuardedCompletion,
}

impl EvaluationAgent {
    pub fn new(validator: Arc<dyn Validator>, completion: GuardedCompletion) -> Self {
        Self {
            validator,
            completion,
        }
    }

    /// Never returns a partial result: a validator failure is an error.
    pub fn run_validation(
        &self,
        request: &RunValidationRequest,
        call: &CallContext,
    ) -> Result<ValidationResult, EvaluationError> {
        let path = &request.output_path;
        let unreadable = |reason: String| EvaluationError::OutputUnreadable {
            path: path.display().to_string(),
            reason,
        };
        if !path.is_file() {
            return Err(unreadable("not a regular file".to_string()));
        }
        File::open(path).map_err(|err| unreadable(err.to_string()))?;

        let issues = self
            .validator
            .inspect(path, call.remaining())
            .map_err(EvaluationError::Validator)?;
        if call.is_cancelled() {
            return Err(EvaluationError::Cancelled);
        }
        Ok(build_result(issues, request.correction_attempt))
    }

    pub fn analyze_corrections(
        &self,
        request: &AnalyzeCorrectionsRequest,
    ) -> Result<CorrectionContext, EvaluationError> {
        validate_flat(&request.metadata).map_err(EvaluationError::InvalidMetadata)?;
        Ok(analyze(&request.issues, &request.metadata, &self.completion))
    }
}

impl AgentHandler for EvaluationAgent {
    fn kind(&self) -> AgentKind {
        AgentKind::Evaluation
    }

    fn handle(&self, message: &McpMessage, call: &CallContext) -> Result<Value, ErrorPayload> {
        let action = message.action();
        match action {
            Action::RunValidation => {
                let request: RunValidationRequest = decode_request(message)?;
                let result = self
                    .run_validation(&request, call)
                    .map_err(|e| e.to_payload())?;
                encode_result(action, &result)
            }
            Action::AnalyzeCorrections => {
                let request: AnalyzeCorrectionsRequest = decode_request(message)?;
                let context = self
                    .analyze_corrections(&request)
                    .map_err(|e| e.to_payload())?;
                encode_result(action, &context)
            }
            other => Err(ErrorPayload::new(
                ErrorCode::UnknownRoute,
                format!("evaluation agent does not handle `{other}`"),
            )),
        }
    }
}
