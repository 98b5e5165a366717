use super::{Phase, SessionError};
use crate::metadata::Metadata;
use crate::protocol::{
    CorrectionContext, FieldRequest, FormatConfidence, IssueKey, LifecycleStatus, OverallStatus,
    ValidationResult, VersionedArtifact,
};
use crate::shared::ids::SessionId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::PathBuf;

pub const ORIGINAL_CHECKSUM_LABEL: &str = "original";

pub fn correction_checksum_label(attempt: u32) -> String {
    format!("correction-{attempt}")
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DetectedFormat {
    pub format: String,
    pub confidence: FormatConfidence,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChecksumEntry {
    pub label: String,
    pub sha256: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogEntry {
    pub timestamp: i64,
    pub level: String,
    pub event: String,
    pub message: String,
}

/// Correction cycle state carried across the `correcting` -> `reconverting` commit.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingCorrection {
    pub context: CorrectionContext,
    #[serde(default)]
    pub user_input: Metadata,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowState {
    pub session_id: SessionId,
    pub input_path: PathBuf,
    pub output_path: PathBuf,
    #[serde(default)]
    pub detected_format: Option<DetectedFormat>,
    #[serde(default)]
    pub format_candidates: Vec<String>,
    #[serde(default)]
    pub metadata: Metadata,
    pub phase: Phase,
    #[serde(default)]
    pub progress: u8,
    #[serde(default)]
    pub correction_attempt: u32,
    #[serde(default)]
    pub validation_report: Option<ValidationResult>,
    #[serde(default)]
    pub previous_issues: Option<BTreeSet<IssueKey>>,
    /// Consecutive correction cycles that ended with the issue set they began with.
    #[serde(default)]
    pub unchanged_cycles: u32,
    #[serde(default)]
    pub checksums: Vec<ChecksumEntry>,
    #[serde(default)]
    pub artifacts: Vec<VersionedArtifact>,
    #[serde(default)]
    pub logs: Vec<LogEntry>,
    #[serde(default)]
    pub pending_correction: Option<PendingCorrection>,
    /// Fields the last conversion rejected, asked for on the next metadata pass.
    #[serde(default)]
    pub metadata_requests: Vec<FieldRequest>,
    #[serde(default)]
    pub accepted_with_issues: bool,
    pub created_at: i64,
    pub updated_at: i64,
    #[serde(default)]
    pub terminal_reason: Option<String>,
}

impl WorkflowState {
    pub fn new(
        session_id: SessionId,
        input_path: PathBuf,
        output_path: PathBuf,
        metadata: Metadata,
        now: i64,
    ) -> Self {
        let mut state = Self {
            session_id,
            input_path,
            output_path,
            detected_format: None,
            format_candidates: Vec::new(),
            metadata,
            phase: Phase::Initialized,
            progress: 0,
            correction_attempt: 0,
            validation_report: None,
            previous_issues: None,
            unchanged_cycles: 0,
            checksums: Vec::new(),
            artifacts: Vec::new(),
            logs: Vec::new(),
            pending_correction: None,
            metadata_requests: Vec::new(),
            accepted_with_issues: false,
            created_at: now,
            updated_at: now,
            terminal_reason: None,
        };
        state.log(now, "info", "session.created", "session initialized");
        state
    }

    pub fn transition(
        &mut self,
        next: Phase,
        now: i64,
        reason: impl Into<String>,
    ) -> Result<(), SessionError> {
        if !self.phase.can_transition_to(next) {
            return Err(SessionError::InvalidTransition {
                from: self.phase,
                to: next,
            });
        }
        let reason = reason.into();
        let from = self.phase;
        self.phase = next;
        self.progress = 0;
        self.updated_at = now;
        self.terminal_reason = next.is_terminal().then(|| reason.clone());
        self.log(
            now,
            "info",
            "phase.transition",
            format!("{from} -> {next}: {reason}"),
        );
        Ok(())
    }

    /// Progress only moves forward within a phase.
    pub fn set_progress(&mut self, percent: u8) {
        self.progress = self.progress.max(percent.min(100));
    }

    pub fn log(
        &mut self,
        now: i64,
        level: &str,
        event: &str,
        message: impl Into<String>,
    ) {
        self.logs.push(LogEntry {
            timestamp: now,
            level: level.to_string(),
            event: event.to_string(),
            message: message.into(),
        });
    }

    pub fn record_checksum(&mut self, label: impl Into<String>, sha256: impl Into<String>) {
        self.checksums.push(ChecksumEntry {
            label: label.into(),
            sha256: sha256.into(),
        });
    }

    /// Adds a versioned backup unless one at the same path is already
    /// recorded. Returns whether it was new.
    pub fn record_artifact(&mut self, artifact: VersionedArtifact) -> bool {
        if self.artifacts.iter().any(|known| known.path == artifact.path) {
            return false;
        }
        self.artifacts.push(artifact);
        true
    }

    pub fn latest_checksum(&self) -> Option<&str> {
        self.checksums.last().map(|entry| entry.sha256.as_str())
    }

    pub fn format(&self) -> Option<&str> {
        self.detected_format
            .as_ref()
            .map(|detected| detected.format.as_str())
    }

    pub fn overall_status(&self) -> Option<OverallStatus> {
        self.validation_report
            .as_ref()
            .map(|report| report.overall_status)
    }

    pub fn lifecycle(&self) -> Option<LifecycleStatus> {
        self.validation_report.as_ref().map(|report| report.lifecycle)
    }
}
