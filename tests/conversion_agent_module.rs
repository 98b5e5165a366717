mod support;

use archivist::collaborators::{CollaboratorError, GuardedCompletion, UnavailableCompletion};
use archivist::conversion::{ConversionAgent, ConversionError};
use archivist::metadata::Metadata;
use archivist::protocol::{
    Action, AgentHandler, ApplyCorrectionsRequest, CallContext, CorrectionContext,
    CorrectionStatus, DetectFormatRequest, DetectionMethod, ErrorCode, FormatConfidence,
    McpMessage, RunConversionRequest, VersionedArtifact,
};
use archivist::shared::checksum::sha256_file;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use support::{complete_metadata, FakeLibrary, Fixture, FixedCompletion};

fn agent_with(library: Arc<FakeLibrary>, completion: GuardedCompletion) -> ConversionAgent {
    ConversionAgent::new(library, completion, 70)
}

fn offline() -> GuardedCompletion {
    GuardedCompletion::new(Arc::new(UnavailableCompletion), Duration::from_secs(1))
}

fn call() -> CallContext {
    CallContext::new(Some("sess-test"), Duration::from_secs(5))
}

fn conversion_request(fixture: &Fixture, format: &str) -> RunConversionRequest {
    RunConversionRequest {
        input_path: fixture.input.clone(),
        output_path: fixture.output.clone(),
        format: format.to_string(),
        metadata: complete_metadata(),
    }
}

#[test]
fn confident_completion_wins_over_file_patterns() {
    let fixture = Fixture::spikeglx();
    let completion = GuardedCompletion::new(
        Arc::new(FixedCompletion(
            r#"{"format": "intan", "confidence": 90}"#.to_string(),
        )),
        Duration::from_secs(1),
    );
    let agent = agent_with(Arc::new(FakeLibrary::new(&["Intan"])), completion);
    let detection = agent
        .detect_format(&DetectFormatRequest {
            input_path: fixture.input.clone(),
        })
        .expect("detect");
    assert_eq!(detection.resolved_format(), Some("Intan"));
    assert_eq!(detection.method, DetectionMethod::Completion);
}

#[test]
fn low_confidence_completion_falls_back_to_patterns() {
    let fixture = Fixture::spikeglx();
    let completion = GuardedCompletion::new(
        Arc::new(FixedCompletion("format: Intan\nconfidence: 40".to_string())),
        Duration::from_secs(1),
    );
    let agent = agent_with(Arc::new(FakeLibrary::new(&["SpikeGLX"])), completion);
    let detection = agent
        .detect_format(&DetectFormatRequest {
            input_path: fixture.input.clone(),
        })
        .expect("detect");
    assert_eq!(detection.resolved_format(), Some("SpikeGLX"));
    assert_eq!(detection.confidence, FormatConfidence::High);
    assert_eq!(detection.method, DetectionMethod::Pattern);
}

#[test]
fn missing_input_is_reported_before_anything_runs() {
    let fixture = Fixture::spikeglx();
    let library = Arc::new(FakeLibrary::new(&["SpikeGLX"]));
    let agent = agent_with(library.clone(), offline());
    let mut request = conversion_request(&fixture, "SpikeGLX");
    request.input_path = fixture.root.path().join("nope");

    let err = agent.run_conversion(&request, &call()).expect_err("missing");
    assert!(matches!(err, ConversionError::MissingInput { .. }));
    assert_eq!(err.code(), ErrorCode::MissingInput);
    assert_eq!(library.calls(), 0);
}

#[test]
fn unsupported_format_lists_what_the_library_accepts() {
    let fixture = Fixture::spikeglx();
    let agent = agent_with(Arc::new(FakeLibrary::new(&["Intan", "Plexon"])), offline());
    let err = agent
        .run_conversion(&conversion_request(&fixture, "SpikeGLX"), &call())
        .expect_err("unsupported");
    let payload = err.to_payload();
    assert_eq!(payload.code, ErrorCode::UnsupportedFormat);
    assert_eq!(payload.context["format"], json!("SpikeGLX"));
    assert_eq!(payload.context["supported"], json!(["Intan", "Plexon"]));
}

#[test]
fn malformed_metadata_carries_field_and_suggestion() {
    let fixture = Fixture::spikeglx();
    let agent = agent_with(Arc::new(FakeLibrary::new(&["SpikeGLX"])), offline());
    let mut request = conversion_request(&fixture, "SpikeGLX");
    request
        .metadata
        .insert("session_start_time".to_string(), json!("2024-03-15 14:30"));

    let payload = agent
        .run_conversion(&request, &call())
        .expect_err("malformed")
        .to_payload();
    assert_eq!(payload.code, ErrorCode::MalformedMetadata);
    assert_eq!(payload.context_str("field"), Some("session_start_time"));
    assert_eq!(
        payload.context_str("suggestion"),
        Some("2024-03-15T14:30:00+00:00")
    );
    assert!(!fixture.output.exists());
}

#[test]
fn successful_conversion_reports_the_output_checksum() {
    let fixture = Fixture::spikeglx();
    let agent = agent_with(Arc::new(FakeLibrary::new(&["spikeglx"])), offline());
    let outcome = agent
        .run_conversion(&conversion_request(&fixture, "SpikeGLX"), &call())
        .expect("convert");
    assert_eq!(outcome.output_path, fixture.output);
    assert_eq!(outcome.checksum, sha256_file(&fixture.output).expect("hash"));
}

#[test]
fn cancelled_conversion_never_publishes_output() {
    let fixture = Fixture::spikeglx();
    let agent = agent_with(Arc::new(FakeLibrary::new(&["SpikeGLX"])), offline());
    let cancelled = call();
    cancelled.cancel();
    let err = agent
        .run_conversion(&conversion_request(&fixture, "SpikeGLX"), &cancelled)
        .expect_err("cancelled");
    assert!(matches!(err, ConversionError::Cancelled));
    assert!(!fixture.output.exists());
    let leftovers = std::fs::read_dir(fixture.output.parent().expect("parent"))
        .expect("read dir")
        .count();
    assert_eq!(leftovers, 0);
}

#[test]
fn corrections_back_up_output_and_let_user_input_win() {
    let fixture = Fixture::spikeglx();
    let agent = agent_with(Arc::new(FakeLibrary::new(&["SpikeGLX"])), offline());
    let first = agent
        .run_conversion(&conversion_request(&fixture, "SpikeGLX"), &call())
        .expect("convert");

    let mut auto_fixes = Metadata::new();
    auto_fixes.insert("species".to_string(), json!("Mus musculus"));
    auto_fixes.insert("sex".to_string(), json!("U"));
    let mut user_input = Metadata::new();
    user_input.insert("species".to_string(), json!("Rattus norvegicus"));
    let request = ApplyCorrectionsRequest {
        input_path: fixture.input.clone(),
        output_path: fixture.output.clone(),
        format: "SpikeGLX".to_string(),
        metadata: complete_metadata(),
        attempt: 1,
        correction_context: CorrectionContext::default(),
        auto_fixes,
        user_input,
    };
    let outcome = agent.apply_corrections(&request, &call()).expect("correct");

    assert_eq!(outcome.status, CorrectionStatus::Reconverted);
    assert_eq!(outcome.attempt, 1);
    assert_eq!(outcome.metadata["species"], json!("Rattus norvegicus"));
    assert_eq!(outcome.metadata["sex"], json!("U"));
    assert_eq!(outcome.backup.checksum, first.checksum);
    assert_eq!(sha256_file(&outcome.backup.path).expect("hash"), first.checksum);
    assert_ne!(outcome.checksum, first.checksum);
    assert_eq!(outcome.checksum, sha256_file(&fixture.output).expect("hash"));
}

#[test]
fn failed_reconversion_reports_the_backup_it_made() {
    let fixture = Fixture::spikeglx();
    let first = agent_with(Arc::new(FakeLibrary::new(&["SpikeGLX"])), offline())
        .run_conversion(&conversion_request(&fixture, "SpikeGLX"), &call())
        .expect("convert");

    let failing = Arc::new(FakeLibrary::new(&["SpikeGLX"]).fail_next(
        CollaboratorError::Failed {
            tool: "converter".to_string(),
            exit_code: 1,
            stderr: "electrode table mismatch".to_string(),
        },
    ));
    let agent = agent_with(failing, offline());
    let request = ApplyCorrectionsRequest {
        input_path: fixture.input.clone(),
        output_path: fixture.output.clone(),
        format: "SpikeGLX".to_string(),
        metadata: complete_metadata(),
        attempt: 1,
        correction_context: CorrectionContext::default(),
        auto_fixes: Metadata::new(),
        user_input: Metadata::new(),
    };
    let err = agent
        .apply_corrections(&request, &call())
        .expect_err("reconversion fails");
    let ConversionError::AfterBackup { backup, source } = &err else {
        panic!("unexpected error: {err}");
    };
    assert!(matches!(source.as_ref(), ConversionError::Library(_)));
    assert_eq!(backup.attempt, 1);
    assert_eq!(backup.checksum, first.checksum);
    assert!(backup.path.is_file());
    assert_eq!(sha256_file(&fixture.output).expect("hash"), first.checksum);

    let payload = err.to_payload();
    assert_eq!(payload.code, ErrorCode::ConversionFailed);
    assert!(payload.message.contains("electrode table mismatch"));
    let reported: VersionedArtifact =
        serde_json::from_value(payload.context["backup"].clone()).expect("backup context");
    assert_eq!(&reported, backup);
}

#[test]
fn corrections_need_a_prior_output_and_a_positive_attempt() {
    let fixture = Fixture::spikeglx();
    let agent = agent_with(Arc::new(FakeLibrary::new(&["SpikeGLX"])), offline());
    let mut request = ApplyCorrectionsRequest {
        input_path: fixture.input.clone(),
        output_path: fixture.output.clone(),
        format: "SpikeGLX".to_string(),
        metadata: complete_metadata(),
        attempt: 1,
        correction_context: CorrectionContext::default(),
        auto_fixes: Metadata::new(),
        user_input: Metadata::new(),
    };
    assert!(matches!(
        agent.apply_corrections(&request, &call()),
        Err(ConversionError::MissingOutput { .. })
    ));
    request.attempt = 0;
    assert!(matches!(
        agent.apply_corrections(&request, &call()),
        Err(ConversionError::InvalidAttempt(0))
    ));
}

#[test]
fn handler_rejects_undecodable_requests_and_foreign_actions() {
    let agent = agent_with(Arc::new(FakeLibrary::new(&["SpikeGLX"])), offline());
    let message = McpMessage::new(Action::RunConversion, serde_json::Map::new());
    let err = agent.handle(&message, &call()).expect_err("invalid");
    assert_eq!(err.code, ErrorCode::InvalidRequest);

    let message = McpMessage::new(Action::RunValidation, serde_json::Map::new());
    let err = agent.handle(&message, &call()).expect_err("foreign");
    assert_eq!(err.code, ErrorCode::UnknownRoute);
}
