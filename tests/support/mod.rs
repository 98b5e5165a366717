#![allow(dead_code)]

use archivist::app::{build_orchestrator, Collaborators};
use archivist::collaborators::{
    CollaboratorError, ConversionJob, ConversionLibrary, TextCompletion, UnavailableCompletion,
    Validator,
};
use archivist::config::Settings;
use archivist::metadata::Metadata;
use archivist::orchestration::{Decision, DecisionKind, Notice, Orchestrator, UserChannel};
use archivist::protocol::{FieldRequest, Severity, ValidationIssue, ValidationResult};
use serde_json::json;
use std::collections::VecDeque;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Writes a deterministic file derived from the format, input name and
/// structured metadata. Scripted failures fire on their call index.
pub struct FakeLibrary {
    formats: Vec<String>,
    failures: Mutex<Vec<(usize, CollaboratorError)>>,
    pub calls: AtomicUsize,
}

impl FakeLibrary {
    pub fn new(formats: &[&str]) -> Self {
        Self {
            formats: formats.iter().map(|f| f.to_string()).collect(),
            failures: Mutex::new(Vec::new()),
            calls: AtomicUsize::new(0),
        }
    }

    /// Fails the call after the ones already scheduled to fail.
    pub fn fail_next(self, err: CollaboratorError) -> Self {
        let at = self.failures.lock().expect("lock").len();
        self.fail_at(at, err)
    }

    /// Fails the call with zero-based index `call`.
    pub fn fail_at(self, call: usize, err: CollaboratorError) -> Self {
        self.failures.lock().expect("lock").push((call, err));
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl ConversionLibrary for FakeLibrary {
    fn convert(&self, job: &ConversionJob<'_>) -> Result<(), CollaboratorError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        let mut failures = self.failures.lock().expect("lock");
        if let Some(pos) = failures.iter().position(|(at, _)| *at == call) {
            return Err(failures.remove(pos).1);
        }
        drop(failures);
        let body = json!({
            "format": job.format,
            "input": job.input.file_name().map(|n| n.to_string_lossy().into_owned()),
            "metadata": job.metadata,
        });
        fs::write(job.output, body.to_string()).map_err(|source| CollaboratorError::Io {
            path: job.output.display().to_string(),
            source,
        })
    }

    fn supported_formats(&self) -> Vec<String> {
        self.formats.clone()
    }
}

/// Returns queued issue lists in order and repeats the last one forever.
pub struct ScriptedValidator {
    reports: Mutex<VecDeque<Vec<ValidationIssue>>>,
    pub calls: AtomicUsize,
}

impl ScriptedValidator {
    pub fn new(reports: Vec<Vec<ValidationIssue>>) -> Self {
        Self {
            reports: Mutex::new(reports.into()),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn clean() -> Self {
        Self::new(vec![Vec::new()])
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Validator for ScriptedValidator {
    fn inspect(
        &self,
        _output: &Path,
        _timeout: Duration,
    ) -> Result<Vec<ValidationIssue>, CollaboratorError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let mut reports = self.reports.lock().expect("lock");
        if reports.len() > 1 {
            return Ok(reports.pop_front().unwrap_or_default());
        }
        Ok(reports.front().cloned().unwrap_or_default())
    }
}

/// Answers every prompt with the same text.
pub struct FixedCompletion(pub String);

impl TextCompletion for FixedCompletion {
    fn complete(&self, _prompt: &str) -> Result<String, CollaboratorError> {
        Ok(self.0.clone())
    }
}

#[derive(Default)]
pub struct ScriptedChannel {
    pub formats: VecDeque<Option<String>>,
    pub metadata: VecDeque<Metadata>,
    pub decisions: VecDeque<Decision>,
    pub corrections: VecDeque<Metadata>,
    pub notices: Vec<Notice>,
    pub offered: Vec<Vec<DecisionKind>>,
    pub asked_fields: Vec<Vec<String>>,
}

impl ScriptedChannel {
    pub fn deciding(decisions: Vec<Decision>) -> Self {
        Self {
            decisions: decisions.into(),
            ..Self::default()
        }
    }

    pub fn saw(&self, needle: &str) -> bool {
        self.notices.iter().any(|n| n.message.contains(needle))
    }
}

impl UserChannel for ScriptedChannel {
    fn notify(&mut self, notice: &Notice) {
        self.notices.push(notice.clone());
    }

    fn choose_format(&mut self, _candidates: &[String]) -> Option<String> {
        self.formats.pop_front().flatten()
    }

    fn request_metadata(&mut self, requests: &[FieldRequest]) -> Metadata {
        self.asked_fields
            .push(requests.iter().map(|r| r.field.clone()).collect());
        self.metadata.pop_front().unwrap_or_default()
    }

    fn decide(&mut self, _report: &ValidationResult, options: &[DecisionKind]) -> Decision {
        self.offered.push(options.to_vec());
        self.decisions.pop_front().unwrap_or(Decision::Abandon)
    }

    fn provide_corrections(&mut self, requests: &[FieldRequest]) -> Metadata {
        self.asked_fields
            .push(requests.iter().map(|r| r.field.clone()).collect());
        self.corrections.pop_front().unwrap_or_default()
    }
}

pub struct Fixture {
    pub root: tempfile::TempDir,
    pub input: PathBuf,
    pub output: PathBuf,
}

impl Fixture {
    /// A SpikeGLX-looking recording directory and an output path beside it.
    pub fn spikeglx() -> Self {
        let root = tempfile::tempdir().expect("tempdir");
        let input = root.path().join("rec");
        fs::create_dir_all(input.join("run_g0")).expect("mkdir");
        fs::write(input.join("run_g0/run_g0_t0.imec0.ap.bin"), vec![1_u8; 256]).expect("bin");
        fs::write(input.join("run_g0/run_g0_t0.imec0.ap.meta"), "nSavedChans=385\n")
            .expect("meta");
        let output = root.path().join("out/session.nwb");
        Self {
            root,
            input,
            output,
        }
    }

    /// A directory whose file names match two formats.
    pub fn ambiguous() -> Self {
        let root = tempfile::tempdir().expect("tempdir");
        let input = root.path().join("mixed");
        fs::create_dir_all(&input).expect("mkdir");
        fs::write(input.join("a.rhd"), b"intan").expect("rhd");
        fs::write(input.join("b.abf"), b"axon").expect("abf");
        let output = root.path().join("out/mixed.nwb");
        Self {
            root,
            input,
            output,
        }
    }

    pub fn state_root(&self) -> PathBuf {
        self.root.path().join("state")
    }

    pub fn settings(&self) -> Settings {
        let mut settings = Settings::with_state_root(self.state_root());
        settings.timeouts.metadata_seconds = 2;
        settings.timeouts.completion_seconds = 1;
        settings.timeouts.validation_seconds = 5;
        settings.timeouts.conversion_base_seconds = 5;
        settings
    }

    pub fn orchestrator(
        &self,
        library: Arc<FakeLibrary>,
        validator: Arc<ScriptedValidator>,
    ) -> Orchestrator {
        build_orchestrator(
            self.settings(),
            Collaborators {
                library,
                validator,
                completion: Arc::new(UnavailableCompletion),
            },
        )
        .expect("orchestrator")
    }
}

pub fn complete_metadata() -> Metadata {
    let mut metadata = Metadata::new();
    for (key, value) in [
        ("session_description", "Neuropixels probe in V1"),
        ("session_start_time", "2024-03-15T14:30:00+00:00"),
        ("experimenter", "Doe, Jane"),
        ("institution", "Example University"),
        ("subject_id", "m01"),
        ("species", "Mus musculus"),
        ("sex", "M"),
    ] {
        metadata.insert(key.to_string(), json!(value));
    }
    metadata
}

pub fn issue(severity: Severity, location: &str, check_id: &str) -> ValidationIssue {
    ValidationIssue {
        severity,
        message: format!("{check_id} failed at {location}"),
        location: location.to_string(),
        check_id: check_id.to_string(),
    }
}

pub fn read_log_events(path: &Path) -> Vec<serde_json::Value> {
    fs::read_to_string(path)
        .unwrap_or_default()
        .lines()
        .filter_map(|line| serde_json::from_str(line).ok())
        .collect()
}
