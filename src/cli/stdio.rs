use crate::metadata::Metadata;
use crate::orchestration::{Decision, DecisionKind, Notice, UserChannel};
use crate::protocol::{FieldRequest, ValidationResult};
use serde_json::Value;
use std::io::{self, BufRead, BufReader, Stdin, Stdout, Write};

/// [`UserChannel`] over a line-oriented reader and writer.
pub struct StdioChannel<R, W> {
    input: R,
    output: W,
}

impl StdioChannel<BufReader<Stdin>, Stdout> {
    pub fn stdio() -> Self {
        Self::new(BufReader::new(io::stdin()), io::stdout())
    }
}

impl<R: BufRead, W: Write> StdioChannel<R, W> {
    pub fn new(input: R, output: W) -> Self {
        Self { input, output }
    }

    pub fn into_output(self) -> W {
        self.output
    }

    fn say(&mut self, line: &str) {
        let _ = writeln!(self.output, "{line}");
        let _ = self.output.flush();
    }

    /// `None` on end of input.
    fn ask(&mut self, prompt: &str) -> Option<String> {
        let _ = write!(self.output, "{prompt} ");
        let _ = self.output.flush();
        let mut line = String::new();
        match self.input.read_line(&mut line) {
            Ok(0) | Err(_) => None,
            Ok(_) => Some(line.trim().to_string()),
        }
    }

    fn ask_fields(&mut self, requests: &[FieldRequest]) -> Metadata {
        let mut answers = Metadata::new();
        for request in requests {
            let prompt = if request.example.is_empty() {
                format!("{} [{}]:", request.prompt, request.field)
            } else {
                format!(
                    "{} [{}] (e.g. {}):",
                    request.prompt, request.field, request.example
                )
            };
            match self.ask(&prompt) {
                Some(answer) if !answer.is_empty() => {
                    answers.insert(request.field.clone(), Value::String(answer));
                }
                Some(_) => {}
                None => break,
            }
        }
        answers
    }

    fn ask_overrides(&mut self) -> Metadata {
        self.say("Enter overrides as key=value, one per line; blank line to finish.");
        let mut overrides = Metadata::new();
        while let Some(line) = self.ask(">") {
            if line.is_empty() {
                break;
            }
            match line.split_once('=') {
                Some((key, value)) if !key.trim().is_empty() => {
                    overrides.insert(
                        key.trim().to_string(),
                        Value::String(value.trim().to_string()),
                    );
                }
                _ => self.say("expected key=value"),
            }
        }
        overrides
    }
}

fn parse_decision_kind(raw: &str) -> Option<DecisionKind> {
    match raw.to_ascii_lowercase().as_str() {
        "c" | "correct" | "retry" => Some(DecisionKind::Correct),
        "a" | "accept" | "accept_as_is" => Some(DecisionKind::AcceptAsIs),
        "q" | "abandon" => Some(DecisionKind::Abandon),
        "o" | "override" => Some(DecisionKind::Override),
        _ => None,
    }
}

impl<R: BufRead, W: Write> UserChannel for StdioChannel<R, W> {
    fn notify(&mut self, notice: &Notice) {
        let line = format!("[{}] {}", notice.kind.as_str(), notice.message);
        self.say(&line);
    }

    fn choose_format(&mut self, candidates: &[String]) -> Option<String> {
        self.say("Select the recording format:");
        for (idx, candidate) in candidates.iter().enumerate() {
            self.say(&format!("  {}) {candidate}", idx + 1));
        }
        let answer = self.ask("number or name:")?;
        if answer.is_empty() {
            return None;
        }
        match answer.parse::<usize>() {
            Ok(idx) if (1..=candidates.len()).contains(&idx) => Some(candidates[idx - 1].clone()),
            _ => Some(answer),
        }
    }

    fn request_metadata(&mut self, requests: &[FieldRequest]) -> Metadata {
        self.say("Some metadata is still needed:");
        self.ask_fields(requests)
    }

    fn decide(&mut self, report: &ValidationResult, options: &[DecisionKind]) -> Decision {
        self.say(&format!(
            "Validation {} with {} issue(s):",
            report.overall_status,
            report.issues.len()
        ));
        for issue in &report.issues {
            self.say(&format!(
                "  {} {} at {}: {}",
                issue.severity, issue.check_id, issue.location, issue.message
            ));
        }
        let menu = options
            .iter()
            .map(|option| option.as_str())
            .collect::<Vec<_>>()
            .join(" / ");
        loop {
            let Some(answer) = self.ask(&format!("choose {menu}:")) else {
                self.say("input closed; abandoning");
                return Decision::Abandon;
            };
            match parse_decision_kind(&answer).filter(|kind| options.contains(kind)) {
                Some(DecisionKind::Correct) => return Decision::Correct,
                Some(DecisionKind::AcceptAsIs) => return Decision::AcceptAsIs,
                Some(DecisionKind::Abandon) => return Decision::Abandon,
                Some(DecisionKind::Override) => return Decision::Override(self.ask_overrides()),
                None => self.say(&format!("please answer one of: {menu}")),
            }
        }
    }

    fn provide_corrections(&mut self, requests: &[FieldRequest]) -> Metadata {
        self.say("The following fields need your input:");
        self.ask_fields(requests)
    }
}
