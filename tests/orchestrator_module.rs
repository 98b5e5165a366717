mod support;

use archivist::app::{build_orchestrator, Collaborators};
use archivist::collaborators::{CollaboratorError, UnavailableCompletion, Validator};
use archivist::metadata::Metadata;
use archivist::orchestration::{Decision, DecisionKind, NoticeKind, OrchestratorError};
use archivist::protocol::{LifecycleStatus, OverallStatus, Severity, ValidationIssue};
use archivist::session::{Phase, SessionError, SessionStore};
use archivist::shared::checksum::{sha256_file, short_checksum};
use serde_json::json;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use support::{
    complete_metadata, issue, read_log_events, FakeLibrary, Fixture, ScriptedChannel,
    ScriptedValidator,
};

fn labels(state: &archivist::session::WorkflowState) -> Vec<String> {
    state.checksums.iter().map(|c| c.label.clone()).collect()
}

fn hidden_files(dir: &std::path::Path) -> Vec<String> {
    fs::read_dir(dir)
        .map(|entries| {
            entries
                .filter_map(Result::ok)
                .map(|e| e.file_name().to_string_lossy().into_owned())
                .filter(|name| name.starts_with('.'))
                .collect()
        })
        .unwrap_or_default()
}

#[test]
fn clean_conversion_completes_with_passed_status() {
    let fixture = Fixture::spikeglx();
    let library = Arc::new(FakeLibrary::new(&["SpikeGLX"]));
    let orchestrator =
        fixture.orchestrator(library.clone(), Arc::new(ScriptedValidator::clean()));

    let id = orchestrator
        .start_session(
            fixture.input.clone(),
            fixture.output.clone(),
            complete_metadata(),
            None,
        )
        .expect("start");
    let mut channel = ScriptedChannel::default();
    let state = orchestrator.run(id.as_str(), &mut channel).expect("run");

    assert_eq!(state.phase, Phase::Completed);
    assert_eq!(state.format(), Some("SpikeGLX"));
    assert_eq!(state.overall_status(), Some(OverallStatus::Passed));
    assert_eq!(state.lifecycle(), Some(LifecycleStatus::Passed));
    assert_eq!(state.correction_attempt, 0);
    assert_eq!(labels(&state), vec!["original"]);
    assert_eq!(
        state.latest_checksum(),
        Some(sha256_file(&fixture.output).expect("hash").as_str())
    );
    assert_eq!(library.calls(), 1);
    assert!(hidden_files(fixture.output.parent().expect("parent")).is_empty());
    assert!(channel
        .notices
        .iter()
        .any(|notice| notice.kind == NoticeKind::Outcome));

    let persisted = orchestrator.store().session_path(&id);
    assert!(persisted.is_file());

    let session_events = read_log_events(&fixture.state_root().join("logs/sessions.log"));
    assert!(session_events
        .iter()
        .any(|event| event["event"] == json!("phase.transition")
            && event["sessionId"] == json!(id.as_str())));
    let router_events = read_log_events(&fixture.state_root().join("logs/router.log"));
    let agents: Vec<&str> = router_events
        .iter()
        .filter_map(|event| event["agent"].as_str())
        .collect();
    assert!(agents.contains(&"conversion_agent"));
    assert!(agents.contains(&"evaluation_agent"));
}

#[test]
fn correction_cycle_versions_previous_output_and_improves_lifecycle() {
    let fixture = Fixture::spikeglx();
    let library = Arc::new(FakeLibrary::new(&["SpikeGLX"]));
    let validator = Arc::new(ScriptedValidator::new(vec![
        vec![issue(Severity::Warning, "/general/subject/species", "check_species_binomial")],
        vec![],
    ]));
    let orchestrator = fixture.orchestrator(library, validator);

    let mut metadata = complete_metadata();
    metadata.insert("species".to_string(), json!("mouse"));
    let id = orchestrator
        .start_session(fixture.input.clone(), fixture.output.clone(), metadata, None)
        .expect("start");
    let mut channel = ScriptedChannel::deciding(vec![Decision::Correct]);
    let state = orchestrator.run(id.as_str(), &mut channel).expect("run");

    assert_eq!(state.phase, Phase::Completed);
    assert_eq!(state.lifecycle(), Some(LifecycleStatus::PassedImproved));
    assert_eq!(state.correction_attempt, 1);
    assert_eq!(state.metadata["species"], json!("Mus musculus"));
    assert_eq!(
        channel.offered[0],
        vec![
            DecisionKind::Correct,
            DecisionKind::AcceptAsIs,
            DecisionKind::Abandon
        ]
    );

    let original = state.checksums[0].sha256.clone();
    assert_eq!(labels(&state), vec!["original", "correction-1"]);
    assert_ne!(state.checksums[1].sha256, original);

    assert_eq!(state.artifacts.len(), 1);
    let backup = &state.artifacts[0];
    assert_eq!(backup.attempt, 1);
    assert_eq!(backup.checksum, original);
    let expected_name = format!("session_v1_{}.nwb", short_checksum(&original));
    assert_eq!(
        backup.path.file_name().and_then(|n| n.to_str()),
        Some(expected_name.as_str())
    );
    assert_eq!(sha256_file(&backup.path).expect("hash"), original);
    assert!(channel.saw("species"));
}

#[test]
fn critical_issue_is_fixed_with_user_supplied_field() {
    let fixture = Fixture::spikeglx();
    let validator = Arc::new(ScriptedValidator::new(vec![
        vec![issue(Severity::Critical, "/general/lab", "check_lab_present")],
        vec![],
    ]));
    let orchestrator =
        fixture.orchestrator(Arc::new(FakeLibrary::new(&["SpikeGLX"])), validator);
    let id = orchestrator
        .start_session(
            fixture.input.clone(),
            fixture.output.clone(),
            complete_metadata(),
            None,
        )
        .expect("start");

    let mut channel = ScriptedChannel::deciding(vec![Decision::Correct]);
    let mut supplied = Metadata::new();
    supplied.insert("lab".to_string(), json!("Systems Neuroscience Lab"));
    channel.corrections.push_back(supplied);
    let state = orchestrator.run(id.as_str(), &mut channel).expect("run");

    assert_eq!(channel.offered[0], vec![DecisionKind::Correct, DecisionKind::Abandon]);
    assert_eq!(channel.asked_fields, vec![vec!["lab".to_string()]]);
    assert_eq!(state.phase, Phase::Completed);
    assert_eq!(state.lifecycle(), Some(LifecycleStatus::PassedImproved));
    assert_eq!(state.metadata["lab"], json!("Systems Neuroscience Lab"));
    let backup = &state.artifacts[0];
    assert_eq!(
        backup.path,
        fixture.output.with_file_name(format!(
            "session_v1_{}.nwb",
            short_checksum(&state.checksums[0].sha256)
        ))
    );
    assert!(state
        .logs
        .iter()
        .any(|entry| entry.event == "correction.planned"));
}

#[test]
fn unchanged_issue_set_enters_no_progress_until_override_helps() {
    let fixture = Fixture::spikeglx();
    let lab_missing = vec![issue(Severity::Error, "/general/lab", "check_lab_present")];
    let validator = Arc::new(ScriptedValidator::new(vec![
        lab_missing.clone(),
        lab_missing.clone(),
        lab_missing,
        vec![],
    ]));
    let orchestrator =
        fixture.orchestrator(Arc::new(FakeLibrary::new(&["SpikeGLX"])), validator);

    let id = orchestrator
        .start_session(
            fixture.input.clone(),
            fixture.output.clone(),
            complete_metadata(),
            None,
        )
        .expect("start");
    let mut overrides = Metadata::new();
    overrides.insert("lab".to_string(), json!("Systems Neuroscience Lab"));
    let mut channel = ScriptedChannel::deciding(vec![
        Decision::Correct,
        Decision::Correct,
        Decision::Override(overrides),
    ]);
    let state = orchestrator.run(id.as_str(), &mut channel).expect("run");

    assert_eq!(
        channel.asked_fields,
        vec![vec!["lab".to_string()], vec!["lab".to_string()]]
    );
    assert_eq!(
        channel.offered,
        vec![
            vec![DecisionKind::Correct, DecisionKind::Abandon],
            vec![DecisionKind::Correct, DecisionKind::Abandon],
            vec![DecisionKind::Override, DecisionKind::Abandon],
        ]
    );
    assert!(channel
        .notices
        .iter()
        .any(|notice| notice.kind == NoticeKind::NoProgress));
    assert_eq!(state.phase, Phase::Completed);
    assert_eq!(state.correction_attempt, 3);
    assert_eq!(state.unchanged_cycles, 0);
    assert_eq!(state.metadata["lab"], json!("Systems Neuroscience Lab"));
    assert_eq!(state.artifacts.len(), 3);
    assert!(state
        .logs
        .iter()
        .any(|entry| entry.message.contains("no_progress")));
}

#[test]
fn two_identical_correction_rounds_stop_before_a_third_attempt() {
    let fixture = Fixture::spikeglx();
    let library = Arc::new(FakeLibrary::new(&["SpikeGLX"]));
    let validator = Arc::new(ScriptedValidator::new(vec![vec![issue(
        Severity::Error,
        "X",
        "E1",
    )]]));
    let orchestrator = fixture.orchestrator(library.clone(), validator.clone());
    let id = orchestrator
        .start_session(
            fixture.input.clone(),
            fixture.output.clone(),
            complete_metadata(),
            None,
        )
        .expect("start");

    // Runs out of scripted decisions at the escape and abandons.
    let mut channel = ScriptedChannel::deciding(vec![Decision::Correct, Decision::Correct]);
    let state = orchestrator.run(id.as_str(), &mut channel).expect("run");

    assert_eq!(
        channel.offered,
        vec![
            vec![DecisionKind::Correct, DecisionKind::Abandon],
            vec![DecisionKind::Correct, DecisionKind::Abandon],
            vec![DecisionKind::Override, DecisionKind::Abandon],
        ]
    );
    let no_progress: Vec<_> = channel
        .notices
        .iter()
        .filter(|notice| notice.kind == NoticeKind::NoProgress)
        .collect();
    assert_eq!(no_progress.len(), 1);
    assert_eq!(state.phase, Phase::Abandoned);
    assert_eq!(state.correction_attempt, 2);
    assert_eq!(state.unchanged_cycles, 2);
    // One conversion plus two corrections; the third is never sent.
    assert_eq!(library.calls(), 3);
    assert_eq!(validator.calls(), 3);
    assert_eq!(state.artifacts.len(), 2);
    assert!(state.terminal_reason.is_some());
}

#[test]
fn a_changing_issue_set_keeps_the_loop_open() {
    let fixture = Fixture::spikeglx();
    let first = vec![issue(Severity::Error, "/general/lab", "check_lab_present")];
    let second = vec![issue(Severity::Error, "/general/notes", "check_notes")];
    let validator = Arc::new(ScriptedValidator::new(vec![
        first.clone(),
        first,
        second.clone(),
        second,
        vec![],
    ]));
    let orchestrator =
        fixture.orchestrator(Arc::new(FakeLibrary::new(&["SpikeGLX"])), validator);
    let id = orchestrator
        .start_session(
            fixture.input.clone(),
            fixture.output.clone(),
            complete_metadata(),
            None,
        )
        .expect("start");

    let mut channel = ScriptedChannel::deciding(vec![Decision::Correct; 4]);
    let state = orchestrator.run(id.as_str(), &mut channel).expect("run");

    assert_eq!(state.phase, Phase::Completed);
    assert_eq!(state.correction_attempt, 4);
    assert_eq!(state.lifecycle(), Some(LifecycleStatus::PassedImproved));
    assert!(channel
        .offered
        .iter()
        .all(|options| options == &vec![DecisionKind::Correct, DecisionKind::Abandon]));
    assert!(!channel
        .notices
        .iter()
        .any(|notice| notice.kind == NoticeKind::NoProgress));
}

#[test]
fn backup_from_a_failed_reconversion_stays_in_the_ledger() {
    let fixture = Fixture::spikeglx();
    let library = Arc::new(FakeLibrary::new(&["SpikeGLX"]).fail_at(
        1,
        CollaboratorError::Failed {
            tool: "converter".to_string(),
            exit_code: 1,
            stderr: "electrode table mismatch".to_string(),
        },
    ));
    let validator = Arc::new(ScriptedValidator::new(vec![
        vec![issue(Severity::Warning, "/general/subject/species", "check_species_binomial")],
        vec![],
    ]));
    let orchestrator = fixture.orchestrator(library.clone(), validator);

    let mut metadata = complete_metadata();
    metadata.insert("species".to_string(), json!("mouse"));
    let id = orchestrator
        .start_session(fixture.input.clone(), fixture.output.clone(), metadata, None)
        .expect("start");
    let mut channel = ScriptedChannel::deciding(vec![Decision::Correct, Decision::Correct]);
    let state = orchestrator.run(id.as_str(), &mut channel).expect("run");

    assert_eq!(state.phase, Phase::Completed);
    assert_eq!(state.correction_attempt, 2);
    assert_eq!(library.calls(), 3);
    assert!(channel.saw("electrode table mismatch"));
    assert_eq!(labels(&state), vec!["original", "correction-2"]);

    assert_eq!(
        state.artifacts.iter().map(|a| a.attempt).collect::<Vec<_>>(),
        vec![1, 2]
    );
    let original = &state.checksums[0].sha256;
    assert!(state.artifacts.iter().all(|a| &a.checksum == original));

    let out_dir = fixture.output.parent().expect("parent");
    let mut on_disk: Vec<String> = fs::read_dir(out_dir)
        .expect("out dir")
        .filter_map(Result::ok)
        .map(|e| e.file_name().to_string_lossy().into_owned())
        .filter(|name| name.starts_with("session_v"))
        .collect();
    on_disk.sort();
    let mut ledger: Vec<String> = state
        .artifacts
        .iter()
        .filter_map(|a| a.path.file_name())
        .map(|name| name.to_string_lossy().into_owned())
        .collect();
    ledger.sort();
    assert_eq!(ledger, on_disk);
}

/// Records the phase and progress an outside reader sees while validating.
struct ObservingValidator {
    state_root: PathBuf,
    seen: Mutex<Vec<(Phase, u8)>>,
}

impl Validator for ObservingValidator {
    fn inspect(
        &self,
        _output: &Path,
        _timeout: Duration,
    ) -> Result<Vec<ValidationIssue>, CollaboratorError> {
        let sessions = SessionStore::new(&self.state_root)
            .list()
            .expect("list sessions");
        let mut seen = self.seen.lock().expect("lock");
        seen.extend(sessions.iter().map(|state| (state.phase, state.progress)));
        Ok(Vec::new())
    }
}

#[test]
fn dispatched_phases_publish_progress_to_readers() {
    let fixture = Fixture::spikeglx();
    let validator = Arc::new(ObservingValidator {
        state_root: fixture.state_root(),
        seen: Mutex::new(Vec::new()),
    });
    let orchestrator = build_orchestrator(
        fixture.settings(),
        Collaborators {
            library: Arc::new(FakeLibrary::new(&["SpikeGLX"])),
            validator: validator.clone(),
            completion: Arc::new(UnavailableCompletion),
        },
    )
    .expect("orchestrator");
    let id = orchestrator
        .start_session(
            fixture.input.clone(),
            fixture.output.clone(),
            complete_metadata(),
            None,
        )
        .expect("start");
    let state = orchestrator
        .run(id.as_str(), &mut ScriptedChannel::default())
        .expect("run");

    assert_eq!(state.phase, Phase::Completed);
    assert_eq!(
        *validator.seen.lock().expect("lock"),
        vec![(Phase::Validating, 50)]
    );
}

#[test]
fn accept_as_is_is_refused_for_failed_validation() {
    let fixture = Fixture::spikeglx();
    let validator = Arc::new(ScriptedValidator::new(vec![vec![issue(
        Severity::Critical,
        "/acquisition",
        "check_data_present",
    )]]));
    let orchestrator =
        fixture.orchestrator(Arc::new(FakeLibrary::new(&["SpikeGLX"])), validator);
    let id = orchestrator
        .start_session(
            fixture.input.clone(),
            fixture.output.clone(),
            complete_metadata(),
            None,
        )
        .expect("start");

    let mut channel = ScriptedChannel::deciding(vec![Decision::AcceptAsIs]);
    let err = orchestrator
        .run(id.as_str(), &mut channel)
        .expect_err("accept must be refused");
    assert!(matches!(
        err,
        OrchestratorError::AcceptAsIsRejected {
            status: OverallStatus::Failed
        }
    ));
    assert!(err.is_resumable());

    let snapshot = orchestrator.store().snapshot(id.as_str()).expect("snapshot");
    assert_eq!(snapshot.phase, Phase::AwaitingRetryApproval);
    assert!(!snapshot.accepted_with_issues);

    let err = orchestrator
        .accept_as_is(id.as_str())
        .expect_err("out-of-band accept refused too");
    assert!(matches!(err, OrchestratorError::AcceptAsIsRejected { .. }));

    let state = orchestrator
        .abandon(id.as_str(), "recording is unusable")
        .expect("abandon");
    assert_eq!(state.phase, Phase::Abandoned);
    assert_eq!(state.terminal_reason.as_deref(), Some("recording is unusable"));
}

#[test]
fn warnings_can_be_accepted_as_is() {
    let fixture = Fixture::spikeglx();
    let validator = Arc::new(ScriptedValidator::new(vec![vec![issue(
        Severity::Info,
        "/general/keywords",
        "check_keywords",
    )]]));
    let orchestrator =
        fixture.orchestrator(Arc::new(FakeLibrary::new(&["SpikeGLX"])), validator);
    let id = orchestrator
        .start_session(
            fixture.input.clone(),
            fixture.output.clone(),
            complete_metadata(),
            None,
        )
        .expect("start");

    let mut channel = ScriptedChannel::deciding(vec![Decision::AcceptAsIs]);
    let state = orchestrator.run(id.as_str(), &mut channel).expect("run");

    assert_eq!(state.phase, Phase::Completed);
    assert!(state.accepted_with_issues);
    assert_eq!(state.overall_status(), Some(OverallStatus::PassedWithIssues));
    assert_eq!(state.lifecycle(), Some(LifecycleStatus::Passed));
    assert!(state.artifacts.is_empty());
}

#[test]
fn ambiguous_input_waits_for_format_selection_and_resumes() {
    let fixture = Fixture::ambiguous();
    let orchestrator = fixture.orchestrator(
        Arc::new(FakeLibrary::new(&["Intan", "AxonABF"])),
        Arc::new(ScriptedValidator::clean()),
    );
    let id = orchestrator
        .start_session(
            fixture.input.clone(),
            fixture.output.clone(),
            complete_metadata(),
            None,
        )
        .expect("start");

    let mut silent = ScriptedChannel::default();
    let err = orchestrator
        .run(id.as_str(), &mut silent)
        .expect_err("format required");
    let OrchestratorError::FormatSelectionRequired { candidates } = err else {
        panic!("unexpected error: {err}");
    };
    assert_eq!(candidates, vec!["AxonABF".to_string(), "Intan".to_string()]);
    assert_eq!(
        orchestrator.store().snapshot(id.as_str()).expect("snapshot").phase,
        Phase::AwaitingFormatSelection
    );

    let mut channel = ScriptedChannel::default();
    channel.formats.push_back(Some("Intan".to_string()));
    let state = orchestrator.run(id.as_str(), &mut channel).expect("resume");
    assert_eq!(state.phase, Phase::Completed);
    assert_eq!(state.format(), Some("Intan"));
    assert!(state.format_candidates.is_empty());
}

#[test]
fn unsupported_format_returns_to_selection() {
    let fixture = Fixture::spikeglx();
    let orchestrator = fixture.orchestrator(
        Arc::new(FakeLibrary::new(&["Intan"])),
        Arc::new(ScriptedValidator::clean()),
    );
    let id = orchestrator
        .start_session(
            fixture.input.clone(),
            fixture.output.clone(),
            complete_metadata(),
            Some("SpikeGLX".to_string()),
        )
        .expect("start");

    let mut channel = ScriptedChannel::default();
    channel.formats.push_back(Some("Intan".to_string()));
    let state = orchestrator.run(id.as_str(), &mut channel).expect("run");

    assert_eq!(state.phase, Phase::Completed);
    assert_eq!(state.format(), Some("Intan"));
    assert!(state
        .logs
        .iter()
        .any(|entry| entry.message.contains("converting -> awaiting_format_selection")));
}

#[test]
fn missing_metadata_is_requested_and_unanswered_fields_block() {
    let fixture = Fixture::spikeglx();
    let orchestrator = fixture.orchestrator(
        Arc::new(FakeLibrary::new(&["SpikeGLX"])),
        Arc::new(ScriptedValidator::clean()),
    );
    let mut metadata = complete_metadata();
    metadata.remove("institution");
    metadata.remove("sex");
    let id = orchestrator
        .start_session(fixture.input.clone(), fixture.output.clone(), metadata, None)
        .expect("start");

    let mut partial = ScriptedChannel::default();
    let mut answers = Metadata::new();
    answers.insert("sex".to_string(), json!("F"));
    partial.metadata.push_back(answers);
    let err = orchestrator
        .run(id.as_str(), &mut partial)
        .expect_err("institution still missing");
    let OrchestratorError::MetadataIncomplete { fields } = err else {
        panic!("unexpected error: {err}");
    };
    assert_eq!(fields, vec!["institution".to_string()]);
    assert_eq!(
        partial.asked_fields,
        vec![vec!["institution".to_string(), "sex".to_string()]]
    );

    let snapshot = orchestrator.store().snapshot(id.as_str()).expect("snapshot");
    assert_eq!(snapshot.phase, Phase::CollectingMetadata);
    assert_eq!(snapshot.metadata["sex"], json!("F"));

    let mut channel = ScriptedChannel::default();
    let mut answers = Metadata::new();
    answers.insert("institution".to_string(), json!("Example University"));
    channel.metadata.push_back(answers);
    let state = orchestrator.run(id.as_str(), &mut channel).expect("resume");
    assert_eq!(state.phase, Phase::Completed);
}

#[test]
fn malformed_timestamp_is_collected_again_before_converting() {
    let fixture = Fixture::spikeglx();
    let library = Arc::new(FakeLibrary::new(&["SpikeGLX"]));
    let orchestrator =
        fixture.orchestrator(library.clone(), Arc::new(ScriptedValidator::clean()));
    let mut metadata = complete_metadata();
    metadata.insert("session_start_time".to_string(), json!("2024-03-15 14:30"));
    let id = orchestrator
        .start_session(fixture.input.clone(), fixture.output.clone(), metadata, None)
        .expect("start");

    let mut channel = ScriptedChannel::default();
    let mut answers = Metadata::new();
    answers.insert(
        "session_start_time".to_string(),
        json!("2024-03-15T14:30:00+00:00"),
    );
    channel.metadata.push_back(answers);
    let state = orchestrator.run(id.as_str(), &mut channel).expect("run");

    assert_eq!(channel.asked_fields, vec![vec!["session_start_time".to_string()]]);
    assert_eq!(state.phase, Phase::Completed);
    assert_eq!(library.calls(), 1);
    assert!(state.metadata_requests.is_empty());
}

#[test]
fn transport_failure_is_retried_once() {
    let fixture = Fixture::spikeglx();
    let library = Arc::new(FakeLibrary::new(&["SpikeGLX"]).fail_next(
        CollaboratorError::Unavailable {
            tool: "converter".to_string(),
            reason: "connection reset".to_string(),
        },
    ));
    let orchestrator =
        fixture.orchestrator(library.clone(), Arc::new(ScriptedValidator::clean()));
    let id = orchestrator
        .start_session(
            fixture.input.clone(),
            fixture.output.clone(),
            complete_metadata(),
            None,
        )
        .expect("start");

    let state = orchestrator
        .run(id.as_str(), &mut ScriptedChannel::default())
        .expect("run");
    assert_eq!(state.phase, Phase::Completed);
    assert_eq!(library.calls(), 2);
    assert!(state.logs.iter().any(|entry| entry.event == "agent.retry"));
}

#[test]
fn repeated_transport_failure_leaves_session_resumable() {
    let fixture = Fixture::spikeglx();
    let unavailable = || CollaboratorError::Unavailable {
        tool: "converter".to_string(),
        reason: "connection reset".to_string(),
    };
    let library = Arc::new(
        FakeLibrary::new(&["SpikeGLX"])
            .fail_next(unavailable())
            .fail_next(unavailable()),
    );
    let orchestrator =
        fixture.orchestrator(library.clone(), Arc::new(ScriptedValidator::clean()));
    let id = orchestrator
        .start_session(
            fixture.input.clone(),
            fixture.output.clone(),
            complete_metadata(),
            None,
        )
        .expect("start");

    let err = orchestrator
        .run(id.as_str(), &mut ScriptedChannel::default())
        .expect_err("unavailable");
    assert!(matches!(err, OrchestratorError::AgentUnavailable { .. }));
    assert!(err.is_resumable());
    assert_eq!(library.calls(), 2);
    assert_eq!(
        orchestrator.store().snapshot(id.as_str()).expect("snapshot").phase,
        Phase::Converting
    );

    let state = orchestrator
        .run(id.as_str(), &mut ScriptedChannel::default())
        .expect("resume");
    assert_eq!(state.phase, Phase::Completed);
}

#[test]
fn hard_conversion_failure_leaves_no_partial_output() {
    let fixture = Fixture::spikeglx();
    let library = Arc::new(FakeLibrary::new(&["SpikeGLX"]).fail_next(
        CollaboratorError::Failed {
            tool: "converter".to_string(),
            exit_code: 2,
            stderr: "probe geometry missing".to_string(),
        },
    ));
    let orchestrator =
        fixture.orchestrator(library.clone(), Arc::new(ScriptedValidator::clean()));
    let id = orchestrator
        .start_session(
            fixture.input.clone(),
            fixture.output.clone(),
            complete_metadata(),
            None,
        )
        .expect("start");

    let err = orchestrator
        .run(id.as_str(), &mut ScriptedChannel::default())
        .expect_err("conversion failed");
    let OrchestratorError::Agent { payload, .. } = &err else {
        panic!("unexpected error: {err}");
    };
    assert!(payload.message.contains("probe geometry missing"));
    assert_eq!(library.calls(), 1);
    assert!(!fixture.output.exists());
    assert!(hidden_files(fixture.output.parent().expect("parent")).is_empty());

    let snapshot = orchestrator.store().snapshot(id.as_str()).expect("snapshot");
    assert_eq!(snapshot.phase, Phase::Converting);
    assert!(snapshot.logs.iter().any(|entry| entry.event == "step.failed"));

    let state = orchestrator
        .run(id.as_str(), &mut ScriptedChannel::default())
        .expect("resume");
    assert_eq!(state.phase, Phase::Completed);
}

#[test]
fn every_cycle_keeps_its_own_backup() {
    let fixture = Fixture::spikeglx();
    let validator = Arc::new(ScriptedValidator::new(vec![
        vec![issue(Severity::Warning, "/general/notes", "check_notes_a")],
        vec![issue(Severity::Warning, "/general/notes", "check_notes_b")],
        vec![issue(Severity::Warning, "/general/notes", "check_notes_c")],
        vec![],
    ]));
    let orchestrator =
        fixture.orchestrator(Arc::new(FakeLibrary::new(&["SpikeGLX"])), validator);
    let id = orchestrator
        .start_session(
            fixture.input.clone(),
            fixture.output.clone(),
            complete_metadata(),
            None,
        )
        .expect("start");

    let mut channel =
        ScriptedChannel::deciding(vec![Decision::Correct, Decision::Correct, Decision::Correct]);
    let state = orchestrator.run(id.as_str(), &mut channel).expect("run");

    assert_eq!(state.phase, Phase::Completed);
    assert_eq!(state.correction_attempt, 3);
    assert_eq!(
        state.artifacts.iter().map(|a| a.attempt).collect::<Vec<_>>(),
        vec![1, 2, 3]
    );
    for artifact in &state.artifacts {
        assert!(artifact.path.is_file(), "{}", artifact.path.display());
    }
    assert_eq!(
        labels(&state),
        vec!["original", "correction-1", "correction-2", "correction-3"]
    );
    // Nothing changed the metadata, so every reconversion is byte-identical.
    let original = &state.checksums[0].sha256;
    assert!(state.checksums.iter().all(|entry| &entry.sha256 == original));
}

#[test]
fn a_leased_session_cannot_be_run_twice() {
    let fixture = Fixture::spikeglx();
    let orchestrator = fixture.orchestrator(
        Arc::new(FakeLibrary::new(&["SpikeGLX"])),
        Arc::new(ScriptedValidator::clean()),
    );
    let id = orchestrator
        .start_session(
            fixture.input.clone(),
            fixture.output.clone(),
            complete_metadata(),
            None,
        )
        .expect("start");

    let lease = orchestrator.store().checkout(id.as_str()).expect("lease");
    let err = orchestrator
        .run(id.as_str(), &mut ScriptedChannel::default())
        .expect_err("busy");
    assert!(matches!(
        err,
        OrchestratorError::Session(SessionError::SessionBusy { .. })
    ));
    assert!(!err.is_resumable());
    drop(lease);

    let state = orchestrator
        .run(id.as_str(), &mut ScriptedChannel::default())
        .expect("run after release");
    assert_eq!(state.phase, Phase::Completed);
}
