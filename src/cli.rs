//! Terminal front end: `convert`, `resume`, `status`, `sessions`, `accept`
//! and `abandon`.

pub mod stdio;

pub use stdio::StdioChannel;

use crate::app::{build_orchestrator, Collaborators};
use crate::config::{load_settings, Settings};
use crate::metadata::Metadata;
use crate::orchestration::Orchestrator;
use crate::session::{SessionStore, WorkflowState};
use serde_json::Value;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CliVerb {
    Convert,
    Resume,
    Status,
    Sessions,
    Accept,
    Abandon,
    Help,
    Unknown,
}

pub fn parse_cli_verb(input: &str) -> CliVerb {
    match input {
        "convert" => CliVerb::Convert,
        "resume" => CliVerb::Resume,
        "status" => CliVerb::Status,
        "sessions" => CliVerb::Sessions,
        "accept" => CliVerb::Accept,
        "abandon" => CliVerb::Abandon,
        "help" | "--help" | "-h" => CliVerb::Help,
        _ => CliVerb::Unknown,
    }
}

pub fn help_text() -> String {
    [
        "Commands:",
        "  convert --input P --output P [--format F] [--set key=value]... [--config P]",
        "                                       Convert a recording, asking for anything missing",
        "  resume <session-id> [--config P]     Continue an interrupted session",
        "  status <session-id> [--config P]     Show the last committed state of a session",
        "  sessions [--config P]                List known sessions",
        "  accept <session-id> [--config P]     Accept a PASSED_WITH_ISSUES result as-is",
        "  abandon <session-id> [--config P]    Abandon a session",
    ]
    .join("\n")
}

pub fn run_cli(args: Vec<String>) -> Result<String, String> {
    if args.is_empty() {
        return Ok(help_text());
    }
    let rest = &args[1..];
    match parse_cli_verb(args[0].as_str()) {
        CliVerb::Convert => cmd_convert(rest),
        CliVerb::Resume => cmd_resume(rest),
        CliVerb::Status => cmd_status(rest),
        CliVerb::Sessions => cmd_sessions(rest),
        CliVerb::Accept => cmd_accept(rest),
        CliVerb::Abandon => cmd_abandon(rest),
        CliVerb::Help => Ok(help_text()),
        CliVerb::Unknown => Err(format!("unknown command `{}`", args[0])),
    }
}

#[derive(Debug, Default, PartialEq)]
pub struct ConvertArgs {
    pub input: PathBuf,
    pub output: PathBuf,
    pub format: Option<String>,
    pub metadata: Metadata,
    pub config: Option<PathBuf>,
}

pub fn parse_convert_args(args: &[String]) -> Result<ConvertArgs, String> {
    let mut input = None;
    let mut output = None;
    let mut parsed = ConvertArgs::default();
    let mut i = 0usize;
    while i < args.len() {
        let flag = args[i].as_str();
        let value = args
            .get(i + 1)
            .ok_or_else(|| format!("{flag} requires a value"))?;
        match flag {
            "--input" => input = Some(PathBuf::from(value)),
            "--output" => output = Some(PathBuf::from(value)),
            "--format" => parsed.format = Some(value.clone()),
            "--config" => parsed.config = Some(PathBuf::from(value)),
            "--set" => {
                let (key, raw) = value
                    .split_once('=')
                    .ok_or_else(|| "--set requires key=value".to_string())?;
                let key = key.trim();
                if key.is_empty() {
                    return Err("--set requires a non-empty key".to_string());
                }
                parsed
                    .metadata
                    .insert(key.to_string(), Value::String(raw.trim().to_string()));
            }
            other => return Err(format!("unexpected argument `{other}`")),
        }
        i += 2;
    }
    parsed.input = input.ok_or_else(|| "convert requires --input".to_string())?;
    parsed.output = output.ok_or_else(|| "convert requires --output".to_string())?;
    Ok(parsed)
}

/// `<session-id> [--config P]`.
fn parse_session_args(command: &str, args: &[String]) -> Result<(String, Option<PathBuf>), String> {
    let Some(session_id) = args.first() else {
        return Err(format!("{command} requires a session id"));
    };
    let config = parse_config_flag(&args[1..])?;
    Ok((session_id.clone(), config))
}

fn parse_config_flag(args: &[String]) -> Result<Option<PathBuf>, String> {
    match args {
        [] => Ok(None),
        [flag, path] if flag == "--config" => Ok(Some(PathBuf::from(path))),
        [other, ..] => Err(format!("unexpected argument `{other}`")),
    }
}

fn settings_for(config: Option<&Path>) -> Result<Settings, String> {
    load_settings(config).map_err(|e| e.to_string())
}

fn orchestrator_for(config: Option<&Path>) -> Result<Orchestrator, String> {
    let settings = settings_for(config)?;
    let collaborators = Collaborators::from_settings(&settings).map_err(|e| e.to_string())?;
    build_orchestrator(settings, collaborators).map_err(|e| e.to_string())
}

fn cmd_convert(args: &[String]) -> Result<String, String> {
    let parsed = parse_convert_args(args)?;
    let orchestrator = orchestrator_for(parsed.config.as_deref())?;
    let session_id = orchestrator
        .start_session(parsed.input, parsed.output, parsed.metadata, parsed.format)
        .map_err(|e| e.to_string())?;
    drive(&orchestrator, session_id.as_str())
}

fn cmd_resume(args: &[String]) -> Result<String, String> {
    let (session_id, config) = parse_session_args("resume", args)?;
    let orchestrator = orchestrator_for(config.as_deref())?;
    drive(&orchestrator, &session_id)
}

fn drive(orchestrator: &Orchestrator, session_id: &str) -> Result<String, String> {
    let mut channel = StdioChannel::stdio();
    match orchestrator.run(session_id, &mut channel) {
        Ok(state) => Ok(render_state(&state)),
        Err(err) => {
            let hint = if err.is_resumable() {
                format!("\nresume with: archivist resume {session_id}")
            } else {
                String::new()
            };
            Err(format!("session_id={session_id}\nerror={err}{hint}"))
        }
    }
}

fn cmd_status(args: &[String]) -> Result<String, String> {
    let (session_id, config) = parse_session_args("status", args)?;
    let settings = settings_for(config.as_deref())?;
    let store = SessionStore::new(settings.state_root);
    let state = store.snapshot(&session_id).map_err(|e| e.to_string())?;
    Ok(render_state(&state))
}

fn cmd_sessions(args: &[String]) -> Result<String, String> {
    let config = parse_config_flag(args)?;
    let settings = settings_for(config.as_deref())?;
    let store = SessionStore::new(settings.state_root);
    let sessions = store.list().map_err(|e| e.to_string())?;
    if sessions.is_empty() {
        return Ok("no sessions".to_string());
    }
    Ok(sessions
        .iter()
        .map(|state| {
            format!(
                "{} phase={} attempts={} updated_at={}",
                state.session_id, state.phase, state.correction_attempt, state.updated_at
            )
        })
        .collect::<Vec<_>>()
        .join("\n"))
}

fn cmd_accept(args: &[String]) -> Result<String, String> {
    let (session_id, config) = parse_session_args("accept", args)?;
    let orchestrator = orchestrator_for(config.as_deref())?;
    let state = orchestrator
        .accept_as_is(&session_id)
        .map_err(|e| e.to_string())?;
    Ok(render_state(&state))
}

fn cmd_abandon(args: &[String]) -> Result<String, String> {
    let (session_id, config) = parse_session_args("abandon", args)?;
    let orchestrator = orchestrator_for(config.as_deref())?;
    let state = orchestrator
        .abandon(&session_id, "abandoned by command")
        .map_err(|e| e.to_string())?;
    Ok(render_state(&state))
}

pub fn render_state(state: &WorkflowState) -> String {
    let mut lines = vec![
        format!("session_id={}", state.session_id),
        format!("phase={}", state.phase),
        format!("progress={}", state.progress),
        format!("format={}", state.format().unwrap_or("-")),
        format!("output={}", state.output_path.display()),
        format!("correction_attempt={}", state.correction_attempt),
    ];
    if let Some(report) = &state.validation_report {
        lines.push(format!("status={}", report.overall_status));
        lines.push(format!("lifecycle={}", report.lifecycle));
        lines.push(format!("issues={}", report.issues.len()));
    }
    for entry in &state.checksums {
        lines.push(format!("checksum.{}={}", entry.label, entry.sha256));
    }
    for artifact in &state.artifacts {
        lines.push(format!("artifact.v{}={}", artifact.attempt, artifact.path.display()));
    }
    if let Some(reason) = &state.terminal_reason {
        lines.push(format!("terminal_reason={reason}"));
    }
    lines.join("\n")
}
