use crate::protocol::{LifecycleStatus, OverallStatus, Severity, ValidationIssue, ValidationResult};
use std::collections::BTreeMap;

/// Any CRITICAL or ERROR fails; any remaining issue passes with issues.
pub fn classify(issues: &[ValidationIssue]) -> OverallStatus {
    if issues.iter().any(|issue| issue.severity.is_blocking()) {
        OverallStatus::Failed
    } else if issues.is_empty() {
        OverallStatus::Passed
    } else {
        OverallStatus::PassedWithIssues
    }
}

pub fn lifecycle(overall: OverallStatus, correction_attempt: u32) -> LifecycleStatus {
    match (overall, correction_attempt) {
        (OverallStatus::Failed, _) => LifecycleStatus::InProgress,
        (_, 0) => LifecycleStatus::Passed,
        (_, _) => LifecycleStatus::PassedImproved,
    }
}

/// Counts for every severity, zeros included.
pub fn count_by_severity(issues: &[ValidationIssue]) -> BTreeMap<Severity, usize> {
    let mut counts: BTreeMap<Severity, usize> =
        Severity::ALL.iter().map(|severity| (*severity, 0)).collect();
    for issue in issues {
        *counts.entry(issue.severity).or_default() += 1;
    }
    counts
}

pub fn build_result(issues: Vec<ValidationIssue>, correction_attempt: u32) -> ValidationResult {
    let overall_status = classify(&issues);
    ValidationResult {
        overall_status,
        lifecycle: lifecycle(overall_status, correction_attempt),
        issue_counts: count_by_severity(&issues),
        issues,
    }
}
