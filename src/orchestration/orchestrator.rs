use super::correction::next_unchanged_cycles;
use super::interaction::{Notice, NoticeKind, UserChannel};
use super::OrchestratorError;
use crate::config::Settings;
use crate::conversion::{input_size_bytes, known_formats};
use crate::metadata::{field_spec, merge_into, missing_fields, validate_flat, Metadata};
use crate::protocol::{
    issue_keys, Action, ConversionOutcome, DetectFormatRequest, ErrorCode, ErrorPayload,
    FieldRequest, FormatConfidence, FormatDetection, MessageRouter, OverallStatus,
    RunConversionRequest, RunValidationRequest, ValidationResult,
};
use crate::session::{
    DetectedFormat, Phase, SessionStore, WorkflowState, ORIGINAL_CHECKSUM_LABEL,
};
use crate::shared::ids::SessionId;
use crate::shared::now_secs;
use serde_json::Value;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Consecutive unchanged correction cycles that end the loop.
pub const NO_PROGRESS_CYCLES: u32 = 2;

/// Drives sessions through the phase machine. The only component that
/// advances `WorkflowState::phase`.
pub struct Orchestrator {
    pub(super) router: Arc<MessageRouter>,
    pub(super) store: Arc<SessionStore>,
    pub(super) settings: Settings,
}

impl Orchestrator {
    pub fn new(router: Arc<MessageRouter>, store: Arc<SessionStore>, settings: Settings) -> Self {
        Self {
            router,
            store,
            settings,
        }
    }

    pub fn store(&self) -> &Arc<SessionStore> {
        &self.store
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Creates a session. A `format` given here skips detection.
    pub fn start_session(
        &self,
        input_path: PathBuf,
        output_path: PathBuf,
        metadata: Metadata,
        format: Option<String>,
    ) -> Result<SessionId, OrchestratorError> {
        validate_flat(&metadata).map_err(OrchestratorError::InvalidMetadata)?;
        let now = now_secs();
        let session_id = SessionId::generate(now).map_err(OrchestratorError::Id)?;
        let mut state = WorkflowState::new(session_id.clone(), input_path, output_path, metadata, now);
        if let Some(format) = format.map(|f| f.trim().to_string()).filter(|f| !f.is_empty()) {
            state.log(now, "info", "format.user", format!("format `{format}` given up front"));
            state.detected_format = Some(DetectedFormat {
                format,
                confidence: FormatConfidence::High,
            });
        }
        self.store.create(state)?;
        Ok(session_id)
    }

    /// Steps the session until it is terminal or a step fails. Every step is
    /// committed, including the one that failed, so the session can resume.
    pub fn run(
        &self,
        session_id: &str,
        channel: &mut dyn UserChannel,
    ) -> Result<Arc<WorkflowState>, OrchestratorError> {
        let mut lease = self.store.checkout(session_id)?;
        while !lease.phase.is_terminal() {
            if let Some(percent) = dispatch_progress(lease.phase) {
                lease.set_progress(percent);
                self.store.commit(&lease)?;
            }
            let outcome = self.step(&mut lease, channel);
            if let Err(err) = &outcome {
                lease.log(now_secs(), "error", "step.failed", err.to_string());
            }
            self.store.commit(&lease)?;
            outcome?;
        }
        drop(lease);
        let finished = self.store.snapshot(session_id)?;
        channel.notify(&Notice::new(
            NoticeKind::Outcome,
            outcome_summary(&finished),
        ));
        Ok(finished)
    }

    /// Advances `state` by one phase.
    pub fn step(
        &self,
        state: &mut WorkflowState,
        channel: &mut dyn UserChannel,
    ) -> Result<(), OrchestratorError> {
        match state.phase {
            Phase::Initialized => {
                state.transition(Phase::DetectingFormat, now_secs(), "session started")?;
                Ok(())
            }
            Phase::DetectingFormat => self.detect(state, channel),
            Phase::AwaitingFormatSelection => self.select_format(state, channel),
            Phase::CollectingMetadata => self.collect_metadata(state, channel),
            Phase::Converting => self.convert(state, channel),
            Phase::Validating => self.validate(state, channel),
            Phase::AwaitingRetryApproval => self.await_retry_approval(state, channel),
            Phase::NoProgress => self.resolve_no_progress(state, channel),
            Phase::Correcting => self.correct(state, channel),
            Phase::Reconverting => self.reconvert(state, channel),
            Phase::Completed | Phase::Abandoned => Ok(()),
        }
    }

    /// Out-of-band accept for a session waiting on a retry decision.
    pub fn accept_as_is(&self, session_id: &str) -> Result<Arc<WorkflowState>, OrchestratorError> {
        let mut lease = self.store.checkout(session_id)?;
        self.accept(&mut lease)?;
        Ok(self.store.commit(&lease)?)
    }

    pub fn abandon(
        &self,
        session_id: &str,
        reason: &str,
    ) -> Result<Arc<WorkflowState>, OrchestratorError> {
        let mut lease = self.store.checkout(session_id)?;
        lease.transition(Phase::Abandoned, now_secs(), reason)?;
        Ok(self.store.commit(&lease)?)
    }

    pub(super) fn accept(&self, state: &mut WorkflowState) -> Result<(), OrchestratorError> {
        if !matches!(state.phase, Phase::AwaitingRetryApproval | Phase::NoProgress) {
            return Err(OrchestratorError::InvalidDecision {
                phase: state.phase,
                decision: "accept_as_is".to_string(),
            });
        }
        match state.overall_status() {
            Some(OverallStatus::PassedWithIssues) => {}
            Some(status) => return Err(OrchestratorError::AcceptAsIsRejected { status }),
            None => {
                return Err(OrchestratorError::InvalidState {
                    phase: state.phase,
                    reason: "no validation report to accept".to_string(),
                })
            }
        }
        state.accepted_with_issues = true;
        state.transition(Phase::Completed, now_secs(), "accepted with issues")?;
        Ok(())
    }

    fn detection_timeout(&self) -> Duration {
        self.settings.timeouts.metadata() + self.completion_budget(1)
    }

    /// Upper bound for `calls` guarded completions, each retried once.
    pub(super) fn completion_budget(&self, calls: usize) -> Duration {
        self.settings.timeouts.completion() * 2 * calls.max(1) as u32
    }

    fn detect(
        &self,
        state: &mut WorkflowState,
        channel: &mut dyn UserChannel,
    ) -> Result<(), OrchestratorError> {
        if let Some(format) = state.format().map(str::to_string) {
            state.transition(
                Phase::CollectingMetadata,
                now_secs(),
                format!("format `{format}` provided"),
            )?;
            return Ok(());
        }
        let request = DetectFormatRequest {
            input_path: state.input_path.clone(),
        };
        let timeout = self.detection_timeout();
        let detection: FormatDetection =
            self.call_agent(state, Action::DetectFormat, &request, timeout)?;
        match detection.resolved_format() {
            Some(format) => {
                let format = format.to_string();
                channel.notify(&Notice::new(
                    NoticeKind::Detection,
                    format!("detected format {format} ({:?})", detection.method),
                ));
                state.detected_format = Some(DetectedFormat {
                    format: format.clone(),
                    confidence: FormatConfidence::High,
                });
                state.transition(
                    Phase::CollectingMetadata,
                    now_secs(),
                    format!("format `{format}` detected"),
                )?;
            }
            None => {
                state.format_candidates = if detection.candidates.is_empty() {
                    known_formats()
                } else {
                    detection.candidates
                };
                channel.notify(&Notice::new(
                    NoticeKind::Detection,
                    "the input format could not be determined with confidence",
                ));
                state.transition(
                    Phase::AwaitingFormatSelection,
                    now_secs(),
                    "format detection was ambiguous",
                )?;
            }
        }
        Ok(())
    }

    fn select_format(
        &self,
        state: &mut WorkflowState,
        channel: &mut dyn UserChannel,
    ) -> Result<(), OrchestratorError> {
        let choice = channel
            .choose_format(&state.format_candidates)
            .map(|format| format.trim().to_string())
            .filter(|format| !format.is_empty());
        let Some(format) = choice else {
            return Err(OrchestratorError::FormatSelectionRequired {
                candidates: state.format_candidates.clone(),
            });
        };
        state.detected_format = Some(DetectedFormat {
            format: format.clone(),
            confidence: FormatConfidence::High,
        });
        state.format_candidates.clear();
        state.transition(
            Phase::CollectingMetadata,
            now_secs(),
            format!("user selected format `{format}`"),
        )?;
        Ok(())
    }

    fn collect_metadata(
        &self,
        state: &mut WorkflowState,
        channel: &mut dyn UserChannel,
    ) -> Result<(), OrchestratorError> {
        let required = &self.settings.required_metadata;
        let mut requests = std::mem::take(&mut state.metadata_requests);
        for field in missing_fields(required, &state.metadata) {
            if !requests.iter().any(|request| request.field == field) {
                requests.push(field_request(&field));
            }
        }

        let mut unanswered = Vec::new();
        if !requests.is_empty() {
            let answers = channel.request_metadata(&requests);
            if let Err(reason) = validate_flat(&answers) {
                state.metadata_requests = requests;
                return Err(OrchestratorError::InvalidMetadata(reason));
            }
            if !answers.is_empty() {
                let answered: Vec<&str> = answers.keys().map(String::as_str).collect();
                state.log(
                    now_secs(),
                    "info",
                    "metadata.collected",
                    format!("received {}", answered.join(", ")),
                );
            }
            merge_into(&mut state.metadata, &answers);
            unanswered = requests
                .into_iter()
                .filter(|request| !answers.contains_key(&request.field))
                .collect();
        }

        let mut missing = missing_fields(required, &state.metadata);
        let present = required.len().saturating_sub(missing.len());
        state.set_progress((present * 100 / required.len().max(1)) as u8);
        for request in &unanswered {
            if !missing.contains(&request.field) {
                missing.push(request.field.clone());
            }
        }
        if !missing.is_empty() {
            state.metadata_requests = unanswered;
            return Err(OrchestratorError::MetadataIncomplete { fields: missing });
        }
        state.transition(
            Phase::Converting,
            now_secs(),
            "required metadata present",
        )?;
        Ok(())
    }

    fn convert(
        &self,
        state: &mut WorkflowState,
        channel: &mut dyn UserChannel,
    ) -> Result<(), OrchestratorError> {
        let Some(format) = state.format().map(str::to_string) else {
            state.format_candidates = known_formats();
            state.transition(
                Phase::AwaitingFormatSelection,
                now_secs(),
                "no format chosen",
            )?;
            return Ok(());
        };
        let request = RunConversionRequest {
            input_path: state.input_path.clone(),
            output_path: state.output_path.clone(),
            format,
            metadata: state.metadata.clone(),
        };
        let timeout = self
            .settings
            .timeouts
            .conversion_for_bytes(input_size_bytes(&state.input_path))
            + self.completion_budget(1);
        match self.call_agent::<_, ConversionOutcome>(state, Action::RunConversion, &request, timeout)
        {
            Ok(outcome) => {
                state.output_path = outcome.output_path;
                state.record_checksum(ORIGINAL_CHECKSUM_LABEL, outcome.checksum.clone());
                channel.notify(&Notice::new(
                    NoticeKind::Status,
                    format!("conversion finished (sha256 {})", outcome.checksum),
                ));
                state.transition(Phase::Validating, now_secs(), "conversion finished")?;
                Ok(())
            }
            Err(OrchestratorError::Agent { payload, .. })
                if payload.code == ErrorCode::UnsupportedFormat =>
            {
                self.reroute_unsupported_format(state, channel, &payload)
            }
            Err(OrchestratorError::Agent { payload, .. })
                if payload.code == ErrorCode::MalformedMetadata =>
            {
                channel.notify(&Notice::new(NoticeKind::Warning, payload.message.clone()));
                state.metadata_requests = vec![malformed_field_request(&payload)];
                state.transition(
                    Phase::CollectingMetadata,
                    now_secs(),
                    "conversion rejected the metadata",
                )?;
                Ok(())
            }
            Err(err) => Err(err),
        }
    }

    fn reroute_unsupported_format(
        &self,
        state: &mut WorkflowState,
        channel: &mut dyn UserChannel,
        payload: &ErrorPayload,
    ) -> Result<(), OrchestratorError> {
        channel.notify(&Notice::new(NoticeKind::Warning, payload.message.clone()));
        let supported: Vec<String> = payload
            .context
            .get("supported")
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();
        state.format_candidates = if supported.is_empty() {
            known_formats()
        } else {
            supported
        };
        state.detected_format = None;
        state.transition(
            Phase::AwaitingFormatSelection,
            now_secs(),
            payload.message.clone(),
        )?;
        Ok(())
    }

    fn validate(
        &self,
        state: &mut WorkflowState,
        channel: &mut dyn UserChannel,
    ) -> Result<(), OrchestratorError> {
        let request = RunValidationRequest {
            output_path: state.output_path.clone(),
            correction_attempt: state.correction_attempt,
        };
        let timeout = self.settings.timeouts.validation();
        let result: ValidationResult =
            self.call_agent(state, Action::RunValidation, &request, timeout)?;

        let current = issue_keys(&result.issues);
        state.unchanged_cycles = next_unchanged_cycles(
            state.correction_attempt,
            state.previous_issues.as_ref(),
            &current,
            state.unchanged_cycles,
        );
        let stalled = state.unchanged_cycles >= NO_PROGRESS_CYCLES;
        channel.notify(&Notice::new(
            NoticeKind::Validation,
            format!(
                "validation {} with {} issue(s)",
                result.overall_status,
                result.issues.len()
            ),
        ));
        let status = result.overall_status;
        state.validation_report = Some(result);

        if status == OverallStatus::Passed {
            state.transition(Phase::Completed, now_secs(), "validation passed")?;
        } else if stalled {
            channel.notify(&Notice::new(
                NoticeKind::NoProgress,
                format!(
                    "the last {} correction attempts left the same {} issue(s) in place",
                    state.unchanged_cycles,
                    current.len()
                ),
            ));
            state.transition(
                Phase::NoProgress,
                now_secs(),
                format!(
                    "issue set unchanged across {} consecutive corrections",
                    state.unchanged_cycles
                ),
            )?;
        } else {
            state.transition(
                Phase::AwaitingRetryApproval,
                now_secs(),
                format!("validation {status}"),
            )?;
        }
        Ok(())
    }
}

/// Progress published while a phase waits on its agent call, so observers
/// can tell a dispatched phase from one not yet started.
fn dispatch_progress(phase: Phase) -> Option<u8> {
    match phase {
        Phase::DetectingFormat
        | Phase::Converting
        | Phase::Validating
        | Phase::Correcting
        | Phase::Reconverting => Some(50),
        _ => None,
    }
}

pub(super) fn field_request(field: &str) -> FieldRequest {
    match field_spec(field) {
        Some(spec) => FieldRequest {
            field: field.to_string(),
            prompt: spec.prompt.to_string(),
            example: spec.example.to_string(),
        },
        None => FieldRequest {
            field: field.to_string(),
            prompt: format!("Please provide a value for `{field}`."),
            example: String::new(),
        },
    }
}

fn malformed_field_request(payload: &ErrorPayload) -> FieldRequest {
    let field = payload.context_str("field").unwrap_or("metadata");
    let mut request = field_request(field);
    if let Some(explanation) = payload.context_str("explanation") {
        request.prompt = format!("{explanation} {}", request.prompt);
    }
    if let Some(suggestion) = payload.context_str("suggestion") {
        request.example = suggestion.to_string();
    }
    request
}

fn outcome_summary(state: &WorkflowState) -> String {
    match (state.phase, state.overall_status()) {
        (Phase::Completed, Some(status)) => match state.lifecycle() {
            Some(lifecycle) => format!(
                "session {} completed: {status} ({lifecycle}) after {} correction(s)",
                state.session_id, state.correction_attempt
            ),
            None => format!("session {} completed: {status}", state.session_id),
        },
        (phase, _) => format!("session {} ended in {phase}", state.session_id),
    }
}
