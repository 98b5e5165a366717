use crate::collaborators::GuardedCompletion;
use crate::metadata::fields::resolve_field;
use crate::metadata::{auto_fix, default_value, field_spec, is_present, Metadata};
use crate::protocol::{CorrectionContext, FieldRequest, Severity, ValidationIssue};
use serde_json::Value;
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Ease {
    Automatic,
    NeedsUser,
}

/// Metadata field an issue refers to. Catalog fields are preferred, then
/// the last segment of the location, then the check id.
pub fn field_for_issue(issue: &ValidationIssue) -> String {
    if let Some(field) = resolve_field(&issue.location)
        .or_else(|| resolve_field(&issue.check_id))
        .or_else(|| resolve_field(&issue.message))
    {
        return field.to_string();
    }
    issue
        .location
        .rsplit(['/', '.', ':'])
        .map(str::trim)
        .find(|segment| !segment.is_empty())
        .unwrap_or(issue.check_id.as_str())
        .to_string()
}

fn fix_for(field: &str, metadata: &Metadata) -> Option<Value> {
    match metadata.get(field).filter(|value| is_present(value)) {
        Some(current) => auto_fix(field, current).filter(|fixed| fixed != current),
        None => default_value(field),
    }
}

fn request_for(field: &str, issue: &ValidationIssue, completion: &GuardedCompletion) -> FieldRequest {
    let (static_prompt, example) = match field_spec(field) {
        Some(spec) => (spec.prompt.to_string(), spec.example.to_string()),
        None => (
            format!("Please provide a value for `{field}`."),
            String::new(),
        ),
    };
    let prompt = format!(
        "A validator reported: \"{}\". Write one short question asking the experimenter for \
         the metadata field `{field}`. Base it on: {static_prompt}",
        issue.message
    );
    FieldRequest {
        field: field.to_string(),
        prompt: completion.complete_or(&prompt, || static_prompt),
        example,
    }
}

/// Splits issues into automatic fixes and fields the user must supply.
/// Priority runs most severe first, automatic fixes before user input
/// within a severity, then by field name.
pub fn analyze(
    issues: &[ValidationIssue],
    metadata: &Metadata,
    completion: &GuardedCompletion,
) -> CorrectionContext {
    let mut ordered: Vec<&ValidationIssue> = issues.iter().collect();
    ordered.sort_by_key(|issue| issue.severity);

    let mut seen: BTreeMap<String, (Severity, Ease)> = BTreeMap::new();
    let mut context = CorrectionContext::default();
    for issue in ordered {
        let field = field_for_issue(issue);
        if seen.contains_key(&field) {
            continue;
        }
        let ease = match fix_for(&field, metadata) {
            Some(value) => {
                context.auto_fixes.insert(field.clone(), value);
                Ease::Automatic
            }
            None => {
                context
                    .user_input_required
                    .push(request_for(&field, issue, completion));
                Ease::NeedsUser
            }
        };
        seen.insert(field, (issue.severity, ease));
    }

    let mut priority: Vec<(Severity, Ease, String)> = seen
        .into_iter()
        .map(|(field, (severity, ease))| (severity, ease, field))
        .collect();
    priority.sort();
    context.priority_order = priority.into_iter().map(|(_, _, field)| field).collect();
    context
}
