use super::interaction::{Decision, DecisionKind, Notice, NoticeKind, UserChannel};
use super::{Orchestrator, OrchestratorError};
use crate::conversion::input_size_bytes;
use crate::metadata::{validate_flat, Metadata};
use crate::protocol::{
    issue_keys, Action, AnalyzeCorrectionsRequest, ApplyCorrectionsRequest, CorrectionContext,
    CorrectionOutcome, ErrorCategory, ErrorPayload, IssueKey, OverallStatus, ValidationResult,
    VersionedArtifact,
};
use crate::session::{correction_checksum_label, PendingCorrection, Phase, WorkflowState};
use crate::shared::now_secs;
use std::collections::BTreeSet;

/// Choices offered after a validation that did not pass outright.
pub fn decision_options(status: OverallStatus, no_progress: bool) -> Vec<DecisionKind> {
    let mut options = Vec::new();
    if no_progress {
        options.push(DecisionKind::Override);
    } else {
        options.push(DecisionKind::Correct);
    }
    if status == OverallStatus::PassedWithIssues {
        options.push(DecisionKind::AcceptAsIs);
    }
    options.push(DecisionKind::Abandon);
    options
}

fn report_of(state: &WorkflowState) -> Result<ValidationResult, OrchestratorError> {
    state
        .validation_report
        .clone()
        .ok_or_else(|| OrchestratorError::InvalidState {
            phase: state.phase,
            reason: "no validation report".to_string(),
        })
}

impl Orchestrator {
    pub(super) fn await_retry_approval(
        &self,
        state: &mut WorkflowState,
        channel: &mut dyn UserChannel,
    ) -> Result<(), OrchestratorError> {
        let report = report_of(state)?;
        let options = decision_options(report.overall_status, false);
        let decision = channel.decide(&report, &options);
        self.apply_decision(state, decision, &options)
    }

    /// The issue set survived consecutive corrections unchanged. Only an override,
    /// accept-as-is (not when FAILED) or abandon may follow.
    pub(super) fn resolve_no_progress(
        &self,
        state: &mut WorkflowState,
        channel: &mut dyn UserChannel,
    ) -> Result<(), OrchestratorError> {
        let report = report_of(state)?;
        let options = decision_options(report.overall_status, true);
        let decision = channel.decide(&report, &options);
        self.apply_decision(state, decision, &options)
    }

    fn apply_decision(
        &self,
        state: &mut WorkflowState,
        decision: Decision,
        options: &[DecisionKind],
    ) -> Result<(), OrchestratorError> {
        let kind = decision.kind();
        if kind == DecisionKind::AcceptAsIs {
            // FAILED reports get AcceptAsIsRejected rather than InvalidDecision.
            return self.accept(state);
        }
        if !options.contains(&kind) {
            return Err(OrchestratorError::InvalidDecision {
                phase: state.phase,
                decision: kind.to_string(),
            });
        }
        match decision {
            Decision::Correct => {
                begin_cycle(state, None)?;
                Ok(())
            }
            Decision::Override(fields) => {
                if fields.is_empty() {
                    return Err(OrchestratorError::InvalidDecision {
                        phase: state.phase,
                        decision: "override with no fields".to_string(),
                    });
                }
                validate_flat(&fields).map_err(OrchestratorError::InvalidMetadata)?;
                begin_cycle(
                    state,
                    Some(PendingCorrection {
                        context: CorrectionContext::default(),
                        user_input: fields,
                    }),
                )?;
                Ok(())
            }
            Decision::Abandon => {
                state.transition(Phase::Abandoned, now_secs(), "abandoned by user")?;
                Ok(())
            }
            Decision::AcceptAsIs => self.accept(state),
        }
    }

    /// Analyzes the current issues, unless an override already fixed the
    /// cycle's input, and gathers what the user must supply.
    pub(super) fn correct(
        &self,
        state: &mut WorkflowState,
        channel: &mut dyn UserChannel,
    ) -> Result<(), OrchestratorError> {
        if state.pending_correction.is_none() {
            let report = report_of(state)?;
            let request = AnalyzeCorrectionsRequest {
                issues: report.issues.clone(),
                metadata: state.metadata.clone(),
            };
            let timeout =
                self.settings.timeouts.metadata() + self.completion_budget(report.issues.len());
            let context: CorrectionContext =
                self.call_agent(state, Action::AnalyzeCorrections, &request, timeout)?;

            if !context.auto_fixes.is_empty() {
                let fields: Vec<&str> = context.auto_fixes.keys().map(String::as_str).collect();
                channel.notify(&Notice::new(
                    NoticeKind::Correction,
                    format!("fixing automatically: {}", fields.join(", ")),
                ));
            }
            let user_input = if context.user_input_required.is_empty() {
                Metadata::new()
            } else {
                channel.provide_corrections(&context.user_input_required)
            };
            validate_flat(&user_input).map_err(OrchestratorError::InvalidMetadata)?;
            state.log(
                now_secs(),
                "info",
                "correction.planned",
                format!(
                    "attempt {}: {} automatic, {} from user, order [{}]",
                    state.correction_attempt,
                    context.auto_fixes.len(),
                    user_input.len(),
                    context.priority_order.join(", ")
                ),
            );
            state.pending_correction = Some(PendingCorrection {
                context,
                user_input,
            });
        }
        state.transition(
            Phase::Reconverting,
            now_secs(),
            format!("correction attempt {} prepared", state.correction_attempt),
        )?;
        Ok(())
    }

    pub(super) fn reconvert(
        &self,
        state: &mut WorkflowState,
        channel: &mut dyn UserChannel,
    ) -> Result<(), OrchestratorError> {
        let Some(format) = state.format().map(str::to_string) else {
            return Err(OrchestratorError::InvalidState {
                phase: state.phase,
                reason: "no format recorded".to_string(),
            });
        };
        let pending = state.pending_correction.clone().unwrap_or_default();
        let attempt = state.correction_attempt;
        let request = ApplyCorrectionsRequest {
            input_path: state.input_path.clone(),
            output_path: state.output_path.clone(),
            format,
            metadata: state.metadata.clone(),
            attempt,
            auto_fixes: pending.context.auto_fixes.clone(),
            user_input: pending.user_input.clone(),
            correction_context: pending.context,
        };
        let timeout = self
            .settings
            .timeouts
            .conversion_for_bytes(input_size_bytes(&state.input_path))
            + self.completion_budget(1);

        let result = self.call_agent::<_, CorrectionOutcome>(
            state,
            Action::ApplyCorrections,
            &request,
            timeout,
        );
        if let Err(
            OrchestratorError::Agent { payload, .. }
            | OrchestratorError::AgentUnavailable { payload, .. },
        ) = &result
        {
            keep_backup_from_failure(state, payload);
        }
        match result {
            Ok(outcome) => {
                state.metadata = outcome.metadata;
                state.output_path = outcome.output_path;
                let message = format!(
                    "attempt {} preserved at {}",
                    outcome.backup.attempt,
                    outcome.backup.path.display()
                );
                if state.record_artifact(outcome.backup) {
                    state.log(now_secs(), "info", "artifact.versioned", message);
                }
                state.record_checksum(correction_checksum_label(attempt), outcome.checksum);
                state.pending_correction = None;
                state.transition(
                    Phase::Validating,
                    now_secs(),
                    format!("correction attempt {attempt} reconverted"),
                )?;
                Ok(())
            }
            Err(OrchestratorError::Agent { payload, .. })
                if payload.code.category() == ErrorCategory::ConversionData =>
            {
                channel.notify(&Notice::new(NoticeKind::Warning, payload.message.clone()));
                state.pending_correction = None;
                state.transition(
                    Phase::AwaitingRetryApproval,
                    now_secs(),
                    format!("correction attempt {attempt} was rejected: {}", payload.message),
                )?;
                Ok(())
            }
            Err(err) => Err(err),
        }
    }
}

/// A reconversion that failed after versioning the prior output still
/// leaves that backup on disk; record it so the ledger matches.
fn keep_backup_from_failure(state: &mut WorkflowState, payload: &ErrorPayload) {
    let Some(value) = payload.context.get("backup") else {
        return;
    };
    let Ok(backup) = serde_json::from_value::<VersionedArtifact>(value.clone()) else {
        return;
    };
    let message = format!(
        "attempt {} preserved at {} before the reconversion failed",
        backup.attempt,
        backup.path.display()
    );
    if state.record_artifact(backup) {
        state.log(now_secs(), "info", "artifact.versioned", message);
    }
}

/// Counts how many correction cycles in a row have ended with the issue set
/// they started from. Any change, an empty set, or a validation outside a
/// correction cycle resets the count.
pub fn next_unchanged_cycles(
    correction_attempt: u32,
    cycle_start: Option<&BTreeSet<IssueKey>>,
    current: &BTreeSet<IssueKey>,
    unchanged_so_far: u32,
) -> u32 {
    if correction_attempt > 0 && !current.is_empty() && cycle_start == Some(current) {
        unchanged_so_far + 1
    } else {
        0
    }
}

/// Opens correction cycle `correction_attempt + 1`, remembering the issue
/// set it starts from.
fn begin_cycle(
    state: &mut WorkflowState,
    pending: Option<PendingCorrection>,
) -> Result<(), OrchestratorError> {
    let report = report_of(state)?;
    state.previous_issues = Some(issue_keys(&report.issues));
    state.correction_attempt += 1;
    state.pending_correction = pending;
    let attempt = state.correction_attempt;
    state.transition(
        Phase::Correcting,
        now_secs(),
        format!("starting correction attempt {attempt}"),
    )?;
    Ok(())
}
