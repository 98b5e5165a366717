use crate::metadata::Metadata;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DetectFormatRequest {
    pub input_path: PathBuf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FormatConfidence {
    High,
    Ambiguous,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectionMethod {
    Completion,
    Pattern,
    User,
    Unresolved,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FormatDetection {
    /// `None` exactly when `confidence` is `Ambiguous`.
    pub format: Option<String>,
    pub confidence: FormatConfidence,
    pub method: DetectionMethod,
    /// Formats the user should choose between when ambiguous.
    #[serde(default)]
    pub candidates: Vec<String>,
}

impl FormatDetection {
    pub fn high(format: impl Into<String>, method: DetectionMethod) -> Self {
        Self {
            format: Some(format.into()),
            confidence: FormatConfidence::High,
            method,
            candidates: Vec::new(),
        }
    }

    pub fn ambiguous(candidates: Vec<String>) -> Self {
        Self {
            format: None,
            confidence: FormatConfidence::Ambiguous,
            method: DetectionMethod::Unresolved,
            candidates,
        }
    }

    pub fn resolved_format(&self) -> Option<&str> {
        match self.confidence {
            FormatConfidence::High => self.format.as_deref(),
            FormatConfidence::Ambiguous => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunConversionRequest {
    pub input_path: PathBuf,
    pub output_path: PathBuf,
    pub format: String,
    #[serde(default)]
    pub metadata: Metadata,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversionOutcome {
    pub output_path: PathBuf,
    pub checksum: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApplyCorrectionsRequest {
    pub input_path: PathBuf,
    pub output_path: PathBuf,
    pub format: String,
    #[serde(default)]
    pub metadata: Metadata,
    /// 1-based number of the correction cycle being applied.
    pub attempt: u32,
    pub correction_context: CorrectionContext,
    #[serde(default)]
    pub auto_fixes: Metadata,
    #[serde(default)]
    pub user_input: Metadata,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CorrectionStatus {
    Reconverted,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionedArtifact {
    pub attempt: u32,
    pub path: PathBuf,
    pub checksum: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorrectionOutcome {
    pub status: CorrectionStatus,
    pub output_path: PathBuf,
    pub attempt: u32,
    pub checksum: String,
    pub backup: VersionedArtifact,
    /// Metadata after auto fixes and user input were merged.
    pub metadata: Metadata,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunValidationRequest {
    pub output_path: PathBuf,
    #[serde(default)]
    pub correction_attempt: u32,
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Severity {
    Critical,
    Error,
    Warning,
    Info,
}

impl Severity {
    pub const ALL: [Severity; 4] = [
        Severity::Critical,
        Severity::Error,
        Severity::Warning,
        Severity::Info,
    ];

    /// CRITICAL and ERROR issues force the correction loop.
    pub fn is_blocking(self) -> bool {
        matches!(self, Severity::Critical | Severity::Error)
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_uppercase().as_str() {
            "CRITICAL" => Some(Self::Critical),
            "ERROR" => Some(Self::Error),
            "WARNING" | "BEST_PRACTICE_VIOLATION" => Some(Self::Warning),
            "INFO" | "BEST_PRACTICE_SUGGESTION" => Some(Self::Info),
            _ => None,
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let raw = match self {
            Self::Critical => "CRITICAL",
            Self::Error => "ERROR",
            Self::Warning => "WARNING",
            Self::Info => "INFO",
        };
        f.write_str(raw)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationIssue {
    pub severity: Severity,
    pub message: String,
    #[serde(default)]
    pub location: String,
    pub check_id: String,
}

impl ValidationIssue {
    pub fn key(&self) -> IssueKey {
        IssueKey {
            check_id: self.check_id.clone(),
            location: self.location.clone(),
        }
    }
}

/// Identity of an issue for no-progress comparison.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct IssueKey {
    pub check_id: String,
    pub location: String,
}

pub fn issue_keys(issues: &[ValidationIssue]) -> BTreeSet<IssueKey> {
    issues.iter().map(ValidationIssue::key).collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OverallStatus {
    Passed,
    PassedWithIssues,
    Failed,
}

impl std::fmt::Display for OverallStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let raw = match self {
            Self::Passed => "PASSED",
            Self::PassedWithIssues => "PASSED_WITH_ISSUES",
            Self::Failed => "FAILED",
        };
        f.write_str(raw)
    }
}

/// Lifecycle marker, separate from the user-facing outcome label.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LifecycleStatus {
    InProgress,
    Passed,
    PassedImproved,
}

impl std::fmt::Display for LifecycleStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let raw = match self {
            Self::InProgress => "IN_PROGRESS",
            Self::Passed => "PASSED",
            Self::PassedImproved => "PASSED_IMPROVED",
        };
        f.write_str(raw)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationResult {
    pub overall_status: OverallStatus,
    pub lifecycle: LifecycleStatus,
    pub issue_counts: BTreeMap<Severity, usize>,
    pub issues: Vec<ValidationIssue>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalyzeCorrectionsRequest {
    pub issues: Vec<ValidationIssue>,
    #[serde(default)]
    pub metadata: Metadata,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldRequest {
    pub field: String,
    pub prompt: String,
    #[serde(default)]
    pub example: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CorrectionContext {
    #[serde(default)]
    pub auto_fixes: Metadata,
    #[serde(default)]
    pub user_input_required: Vec<FieldRequest>,
    #[serde(default)]
    pub priority_order: Vec<String>,
}
