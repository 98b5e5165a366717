use super::{run_command, CollaboratorError, Validator};
use crate::config::ToolCommand;
use crate::protocol::{Severity, ValidationIssue};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

const TOOL: &str = "validator";

/// Validator reached through an external command that prints its findings
/// as JSON on stdout.
#[derive(Debug, Clone)]
pub struct CommandValidator {
    command: ToolCommand,
}

impl CommandValidator {
    pub fn new(command: ToolCommand) -> Self {
        Self { command }
    }
}

impl Validator for CommandValidator {
    fn inspect(
        &self,
        output: &Path,
        timeout: Duration,
    ) -> Result<Vec<ValidationIssue>, CollaboratorError> {
        let vars = BTreeMap::from([("output", output.display().to_string())]);
        let args = self.command.render_args(&vars);
        let result = run_command(TOOL, &self.command.binary, &args, None, timeout)?;
        parse_issue_report(&result.stdout)
    }
}

#[derive(Debug, Deserialize)]
struct RawIssue {
    severity: String,
    #[serde(default)]
    message: String,
    #[serde(default)]
    location: Option<String>,
    #[serde(alias = "check_name")]
    check_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawReport {
    List(Vec<RawIssue>),
    Wrapped { issues: Vec<RawIssue> },
}

/// Accepts a bare JSON array of issues or an object with an `issues` array.
/// Blank output means no issues.
pub fn parse_issue_report(raw: &str) -> Result<Vec<ValidationIssue>, CollaboratorError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Ok(Vec::new());
    }
    let report: RawReport =
        serde_json::from_str(trimmed).map_err(|err| CollaboratorError::Parse {
            tool: TOOL.to_string(),
            reason: err.to_string(),
        })?;
    let raw_issues = match report {
        RawReport::List(issues) | RawReport::Wrapped { issues } => issues,
    };
    raw_issues
        .into_iter()
        .map(|issue| {
            let severity =
                Severity::parse(&issue.severity).ok_or_else(|| CollaboratorError::Parse {
                    tool: TOOL.to_string(),
                    reason: format!("unknown severity `{}`", issue.severity),
                })?;
            Ok(ValidationIssue {
                severity,
                message: issue.message,
                location: issue.location.unwrap_or_default(),
                check_id: issue.check_id,
            })
        })
        .collect()
}
