//
// pipeline_scenarios.rs — End-to-end request pipeline tests with in-memory tools
//
// Drives `Pipeline::run` with the mini assembler from `common` and the
// in-process validator:
// - syntax errors short-circuit validation
// - semantic findings land on the lines that caused them
// - exact duplicates collapse; tool failures surface as errors
// - the per-request temp directory never outlives the request
//

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{
    fake_pipeline, leftovers, request, CountingValidator, FakeAssembler, FixedValidator, TWO_FAULTS,
    VALID,
};
use spvcheck::diag::Severity;
use spvcheck::pipeline::{DiagnosticKind, Pipeline, PipelineError};
use spvcheck::report::{ReportedDiagnostic, ValidationReport};
use spvcheck::srcmap::Location;

#[tokio::test]
async fn valid_document_has_no_diagnostics() {
    let root = tempfile::tempdir().unwrap();
    let (pipeline, assembler, validator) = fake_pipeline(root.path());

    let result = pipeline.run(&request(VALID)).await.unwrap();
    assert!(result.is_empty(), "{:?}", result.as_slice());
    assert_eq!(result.sequence, 1);
    assert_eq!(assembler.calls(), 1);
    assert_eq!(validator.calls(), 1);
    assert_eq!(leftovers(root.path()), 0);
}

#[tokio::test]
async fn syntax_error_short_circuits_validation() {
    let root = tempfile::tempdir().unwrap();
    let (pipeline, _assembler, validator) = fake_pipeline(root.path());
    let source = VALID.replace("%void = OpTypeVoid", "%void = OpTypeViod");

    let result = pipeline.run(&request(&source)).await.unwrap();
    let [d] = result.as_slice() else {
        panic!("expected one diagnostic, got {:?}", result.as_slice());
    };
    assert_eq!(d.kind, DiagnosticKind::Syntax);
    assert_eq!(d.severity, Severity::Error);
    assert_eq!(d.location, Some(Location { line: 4, column: 9 }));
    assert!(d.message.contains("OpTypeViod"), "{}", d.message);
    assert_eq!(validator.calls(), 0);
    assert_eq!(leftovers(root.path()), 0);
}

#[tokio::test]
async fn independent_semantic_faults_map_to_their_lines() {
    let root = tempfile::tempdir().unwrap();
    let (pipeline, _, _) = fake_pipeline(root.path());

    let result = pipeline.run(&request(TWO_FAULTS)).await.unwrap();
    let got: Vec<_> = result
        .as_slice()
        .iter()
        .map(|d| (d.line(), d.kind, d.message.as_str()))
        .collect();
    assert_eq!(got.len(), 2, "{got:?}");

    assert_eq!(got[0].0, Some(12));
    assert_eq!(got[0].1, DiagnosticKind::Semantic);
    assert!(got[0].2.starts_with("undefined id %7"), "{}", got[0].2);

    assert_eq!(got[1].0, Some(13));
    assert!(got[1].2.starts_with("type mismatch at id %9"), "{}", got[1].2);
}

#[tokio::test]
async fn structural_failure_is_a_single_structural_diagnostic() {
    let root = tempfile::tempdir().unwrap();
    let (pipeline, _, _) = fake_pipeline(root.path());
    // %one defined twice; the undefined %7 below must not be reported.
    let source = VALID.replace("%two = OpIAdd %int %one %one", "%one = OpIAdd %int %one %7");

    let result = pipeline.run(&request(&source)).await.unwrap();
    let [d] = result.as_slice() else {
        panic!("expected one diagnostic, got {:?}", result.as_slice());
    };
    assert_eq!(d.kind, DiagnosticKind::Structural);
    assert_eq!(d.code.as_deref(), Some("S0203"));
    assert_eq!(d.line(), Some(10));
}

#[tokio::test]
async fn module_level_findings_are_document_level() {
    let root = tempfile::tempdir().unwrap();
    let (pipeline, _, _) = fake_pipeline(root.path());
    let source = VALID.replace("OpCapability Shader\n", "");

    let result = pipeline.run(&request(&source)).await.unwrap();
    let [d] = result.as_slice() else {
        panic!("expected one diagnostic, got {:?}", result.as_slice());
    };
    assert_eq!(d.location, None);
    assert_eq!(d.code.as_deref(), Some("V0102"));
}

#[tokio::test]
async fn exact_duplicates_are_collapsed() {
    let root = tempfile::tempdir().unwrap();
    let finding = |message: &str| ReportedDiagnostic {
        severity: Severity::Error,
        code: None,
        structural: false,
        instruction: Some(2),
        id: None,
        name: None,
        message: message.into(),
    };
    let report = ValidationReport {
        ok: false,
        aborted_at: None,
        diagnostics: vec![finding("first"), finding("second"), finding("first")],
    };
    let pipeline = Pipeline::new(
        Arc::new(FakeAssembler::new()),
        Arc::new(FixedValidator::Report(report)),
    )
    .with_temp_root(root.path());

    let result = pipeline.run(&request(VALID)).await.unwrap();
    let messages: Vec<_> = result.as_slice().iter().map(|d| d.message.as_str()).collect();
    assert_eq!(messages, vec!["first", "second"]);
    assert_eq!(result.as_slice()[0].location, Some(Location { line: 3, column: 1 }));
}

#[tokio::test]
async fn validator_failure_is_a_tool_error() {
    let root = tempfile::tempdir().unwrap();
    let pipeline = Pipeline::new(Arc::new(FakeAssembler::new()), Arc::new(FixedValidator::Fail))
        .with_temp_root(root.path());

    let err = pipeline.run(&request(VALID)).await.unwrap_err();
    assert!(matches!(err, PipelineError::Tool(_)), "{err}");
    let d = err.to_diagnostic();
    assert_eq!(d.kind, DiagnosticKind::Tool);
    assert!(d.message.contains("validator failed"), "{}", d.message);
    assert_eq!(leftovers(root.path()), 0);
}

#[tokio::test]
async fn missing_temp_root_is_an_error() {
    let root = tempfile::tempdir().unwrap();
    let pipeline = Pipeline::new(
        Arc::new(FakeAssembler::new()),
        Arc::new(CountingValidator::default()),
    )
    .with_temp_root(root.path().join("gone"));

    let err = pipeline.run(&request(VALID)).await.unwrap_err();
    assert!(matches!(err, PipelineError::TempDir(_)), "{err}");
}

#[tokio::test]
async fn dropping_a_request_removes_its_temp_dir() {
    let root = tempfile::tempdir().unwrap();
    let assembler = Arc::new(FakeAssembler::with_delay(Duration::from_secs(30)));
    let pipeline = Pipeline::new(assembler.clone(), Arc::new(CountingValidator::default()))
        .with_temp_root(root.path());

    let req = request(VALID);
    let outcome = tokio::time::timeout(Duration::from_millis(50), pipeline.run(&req)).await;
    assert!(outcome.is_err(), "request should still be running");

    let workdirs = assembler.workdirs();
    assert_eq!(workdirs.len(), 1);
    assert!(!workdirs[0].exists());
    assert_eq!(leftovers(root.path()), 0);
}

#[tokio::test]
async fn concurrent_requests_use_separate_directories() {
    let root = tempfile::tempdir().unwrap();
    let (pipeline, assembler, _) = fake_pipeline(root.path());

    let (first, second) = (request(VALID), request(TWO_FAULTS));
    let (a, b) = tokio::join!(pipeline.run(&first), pipeline.run(&second));
    assert!(a.unwrap().is_empty());
    assert_eq!(b.unwrap().len(), 2);

    let workdirs = assembler.workdirs();
    assert_eq!(workdirs.len(), 2);
    assert_ne!(workdirs[0], workdirs[1]);
    assert_eq!(leftovers(root.path()), 0);
}
