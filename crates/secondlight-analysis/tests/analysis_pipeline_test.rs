//! End-to-end tests for one analysis attempt.
//!
//! The Analysis Service is a `ScriptedBackend` and the stores are
//! in-memory, so these run without a database or network.

use std::sync::Arc;
use std::time::Duration;

use secondlight_analysis::prompts::{ANALYSIS_SYSTEM_PROMPT, FINDINGS_SYSTEM_PROMPT};
use secondlight_analysis::{
    AnalysisConfig, AnalysisError, AnalysisPipeline, AnalysisRequest, DocumentPoller,
    DocumentRepository, DocumentState, DocumentStatusSource, FindingCategory, LogStatus,
    ProcessingLogRepository,
    MemoryStore, PersistOutcome,
};
use secondlight_inference::mock::ScriptedBackend;
use uuid::Uuid;

const LAB_TEXT: &str = "Patient: Jane Doe. Hemoglobin 13.5 g/dL, reference 12.0-15.5. LDL 160 mg/dL.";
const PLAIN_TEXT: &str = "Preheat the oven to 180 degrees and whisk two eggs with sugar.";

struct Harness {
    store: MemoryStore,
    backend: ScriptedBackend,
    pipeline: AnalysisPipeline,
    user_id: Uuid,
}

fn harness(backend: ScriptedBackend) -> Harness {
    let store = MemoryStore::new();
    let pipeline = AnalysisPipeline::new(
        store.analysis_stores(),
        Arc::new(backend.clone()),
        AnalysisConfig::default(),
    );
    Harness {
        store,
        backend,
        pipeline,
        user_id: Uuid::now_v7(),
    }
}

impl Harness {
    fn pending_document(&self) -> Uuid {
        self.store
            .seed_document(self.user_id, "Bloodwork", DocumentState::Pending)
    }

    async fn run(&self, id: Uuid, text: &str) -> Result<secondlight_analysis::AnalysisOutcome, AnalysisError> {
        self.pipeline
            .run(&AnalysisRequest::new(id, text, "PDF", "Bloodwork"), Some(self.user_id))
            .await
    }

    fn state(&self, id: Uuid) -> DocumentState {
        self.store.document(id).unwrap().state
    }
}

#[tokio::test]
async fn test_single_finding_completes_document() {
    let h = harness(ScriptedBackend::new().then_reply(
        r#"{"summary":"ok","key_findings":[{"marker":"Diagnosis","value":"Flu"}]}"#,
    ));
    let id = h.pending_document();

    let outcome = h.run(id, LAB_TEXT).await.unwrap();
    assert_eq!(outcome.summary, "ok");
    assert_eq!(outcome.persist, PersistOutcome::Complete);

    let doc = h.store.document(id).unwrap();
    assert_eq!(doc.processing_status(), "completed");
    assert_eq!(doc.status(), "Analyzed");
    assert_eq!(doc.summary, "ok");
    assert_eq!(doc.error_message, None);

    let findings = h.store.findings(id);
    assert_eq!(findings.len(), 1);
    assert_eq!(findings[0].marker, "Diagnosis");
    assert_eq!(findings[0].value, "Flu");
    assert_eq!(findings[0].category, FindingCategory::Other);

    let logs = h.store.logs(id);
    assert_eq!(logs.len(), 1);
    assert_eq!(logs[0].status, LogStatus::Completed);
    assert!(logs[0].response_payload.is_some());
    assert_eq!(logs[0].request_payload["documentType"], "PDF");

    let calls = h.backend.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].system, ANALYSIS_SYSTEM_PROMPT);
    assert!(calls[0].prompt.contains("Hemoglobin"));
}

#[tokio::test]
async fn test_code_fenced_reply_is_parsed() {
    let h = harness(ScriptedBackend::new().then_reply(
        "```json\n{\"summary\":\"Mild anemia\",\"key_findings\":[{\"marker\":\"Hemoglobin\",\"value\":\"11.2 g/dL\",\"category\":\"Lab Result\"}],\"recommendations\":[\"Recheck in 3 months\"]}\n```",
    ));
    let id = h.pending_document();

    h.run(id, LAB_TEXT).await.unwrap();
    assert_eq!(h.state(id), DocumentState::Completed);
    assert_eq!(h.store.findings(id)[0].category, FindingCategory::LabResult);
    assert_eq!(
        h.store.recommendation_contents(id),
        vec!["Recheck in 3 months"]
    );
}

#[tokio::test]
async fn test_empty_findings_trigger_fallback() {
    let h = harness(
        ScriptedBackend::new()
            .then_reply(r#"{"summary":"Lipid panel","key_findings":[]}"#)
            .then_reply(r#"[{"marker":"LDL","value":"160 mg/dL","category":"lab result"}]"#),
    );
    let id = h.pending_document();

    let outcome = h.run(id, LAB_TEXT).await.unwrap();
    assert_eq!(outcome.finding_count, 1);

    let calls = h.backend.calls();
    assert_eq!(calls.len(), 2);
    assert_eq!(calls[1].system, FINDINGS_SYSTEM_PROMPT);

    let findings = h.store.findings(id);
    assert_eq!(findings[0].marker, "LDL");
    assert_eq!(findings[0].category, FindingCategory::LabResult);
    assert_eq!(
        h.store.logs(id)[0].response_payload.as_ref().unwrap()["fallbackFindings"],
        1
    );
}

#[tokio::test]
async fn test_failed_fallback_still_completes() {
    let h = harness(
        ScriptedBackend::new()
            .then_reply(r#"{"summary":"Nothing notable","key_findings":[]}"#)
            .then_fail("Server error: 503"),
    );
    let id = h.pending_document();

    h.run(id, LAB_TEXT).await.unwrap();
    assert_eq!(h.state(id), DocumentState::Completed);
    assert!(h.store.findings(id).is_empty());
    assert_eq!(h.backend.call_count(), 2);
}

#[tokio::test]
async fn test_unusable_fallback_reply_still_completes() {
    let h = harness(
        ScriptedBackend::new()
            .then_reply(r#"{"summary":"Nothing notable","key_findings":[]}"#)
            .then_reply("I could not find any findings."),
    );
    let id = h.pending_document();

    h.run(id, LAB_TEXT).await.unwrap();
    assert_eq!(h.state(id), DocumentState::Completed);
    assert!(h.store.findings(id).is_empty());
}

#[tokio::test]
async fn test_findings_without_marker_are_dropped() {
    let h = harness(ScriptedBackend::new().then_reply(
        r#"{"summary":"s","key_findings":[
            {"marker":"Glucose","explanation":"Elevated fasting glucose"},
            {"value":"orphan"},
            {"marker":"A1C"}
        ]}"#,
    ));
    let id = h.pending_document();

    h.run(id, LAB_TEXT).await.unwrap();
    let findings = h.store.findings(id);
    assert_eq!(findings.len(), 2);
    assert_eq!(findings[0].value, "Elevated fasting glucose");
    assert_eq!(findings[1].value, "Not specified");
    assert!(findings.iter().all(|f| !f.marker.is_empty() && !f.value.is_empty()));
}

#[tokio::test]
async fn test_missing_text_makes_no_calls_and_no_writes() {
    let h = harness(ScriptedBackend::new());
    let id = h.pending_document();

    let mut request = AnalysisRequest::new(id, "", "PDF", "t");
    let err = h.pipeline.run(&request, None).await.unwrap_err();
    assert_eq!(err.to_string(), "Document text is required for analysis");
    assert_eq!(err.status_code(), 400);

    request.document_text = None;
    request.document_title = None;
    let err = h.pipeline.run(&request, None).await.unwrap_err();
    assert!(err.is_validation());

    assert_eq!(h.backend.call_count(), 0);
    assert_eq!(h.state(id), DocumentState::Pending);
    assert!(h.store.logs(id).is_empty());
}

#[tokio::test]
async fn test_short_text_marks_document_error() {
    let h = harness(ScriptedBackend::new());
    let id = h.pending_document();

    let err = h.run(id, "xq7 zzv 0pl mmk rt").await.unwrap_err();
    assert!(matches!(err, AnalysisError::TextTooShort));
    assert_eq!(err.status_code(), 400);
    assert!(err.to_string().starts_with("Could not extract text"));

    let doc = h.store.document(id).unwrap();
    assert_eq!(doc.processing_status(), "error");
    assert!(doc.error_message.unwrap().starts_with("Could not extract text"));
    assert_eq!(h.backend.call_count(), 0);
}

#[tokio::test]
async fn test_service_failure_marks_document_and_log() {
    let h = harness(ScriptedBackend::new().then_fail("Request timed out: deadline elapsed"));
    let id = h.pending_document();

    let err = h.run(id, LAB_TEXT).await.unwrap_err();
    assert_eq!(err.status_code(), 500);

    let doc = h.store.document(id).unwrap();
    assert_eq!(doc.state, DocumentState::Error);
    assert_eq!(doc.status(), "Error");
    assert!(doc.error_message.unwrap().contains("timed out"));

    let logs = h.store.logs(id);
    assert_eq!(logs.len(), 1);
    assert_eq!(logs[0].status, LogStatus::Error);
    assert!(logs[0].error_message.as_ref().unwrap().contains("timed out"));
    assert!(logs[0].processing_time_ms.is_some());
}

#[tokio::test]
async fn test_non_json_reply_marks_error() {
    let h = harness(ScriptedBackend::new().then_reply("Sure! Here is the summary you asked for."));
    let id = h.pending_document();

    let err = h.run(id, LAB_TEXT).await.unwrap_err();
    assert!(matches!(err, AnalysisError::InvalidResponse(_)));
    assert_eq!(h.state(id), DocumentState::Error);
}

#[tokio::test]
async fn test_non_medical_rejection() {
    let h = harness(
        ScriptedBackend::new().then_reply(r#"{"error":"This appears to be a recipe"}"#),
    );
    let id = h.pending_document();

    let err = h.run(id, PLAIN_TEXT).await.unwrap_err();
    assert!(matches!(err, AnalysisError::NotMedical(_)));
    let doc = h.store.document(id).unwrap();
    assert_eq!(doc.state, DocumentState::Error);
    assert!(doc.error_message.unwrap().contains("recipe"));
}

#[tokio::test]
async fn test_rejected_lab_report_is_misclassification() {
    let h = harness(
        ScriptedBackend::new().then_reply(r#"{"error":"Not a medical document"}"#),
    );
    let id = h.pending_document();

    let err = h
        .run(id, "Laboratory specimen received: whole blood, test panel pending.")
        .await
        .unwrap_err();
    assert!(matches!(err, AnalysisError::Misclassified));
    assert_eq!(h.state(id), DocumentState::Error);
}

#[tokio::test]
async fn test_lab_override_can_be_disabled() {
    let backend = ScriptedBackend::new().then_reply(r#"{"error":"Not a medical document"}"#);
    let store = MemoryStore::new();
    let pipeline = AnalysisPipeline::new(
        store.analysis_stores(),
        Arc::new(backend),
        AnalysisConfig::default().with_lab_keyword_override(false),
    );
    let user = Uuid::now_v7();
    let id = store.seed_document(user, "t", DocumentState::Pending);

    let err = pipeline
        .run(
            &AnalysisRequest::new(id, "Blood test results from the laboratory.", "PDF", "t"),
            Some(user),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, AnalysisError::NotMedical(_)));
}

#[tokio::test]
async fn test_terminal_document_is_never_reprocessed() {
    let h = harness(ScriptedBackend::new().with_default_reply(
        r#"{"summary":"again","key_findings":[{"marker":"m","value":"v"}]}"#,
    ));
    for terminal in [DocumentState::Completed, DocumentState::Error] {
        let id = h
            .store
            .seed_document(h.user_id, "done", terminal);

        let err = h.run(id, LAB_TEXT).await.unwrap_err();
        assert!(matches!(err, AnalysisError::Conflict(_)));
        assert_eq!(err.status_code(), 409);
        assert_eq!(h.state(id), terminal);
        assert!(h.store.logs(id).is_empty());
    }
    assert_eq!(h.backend.call_count(), 0);
}

#[tokio::test]
async fn test_concurrent_attempts_only_one_claims_the_document() {
    let h = harness(
        ScriptedBackend::new()
            .with_default_reply(r#"{"summary":"ok","key_findings":[{"marker":"LDL","value":"160"}]}"#)
            .with_latency(Duration::from_millis(100)),
    );
    let id = h.pending_document();

    let (a, b) = tokio::join!(h.run(id, LAB_TEXT), h.run(id, LAB_TEXT));
    let (won, lost) = match (a, b) {
        (Ok(won), Err(lost)) | (Err(lost), Ok(won)) => (won, lost),
        other => panic!("expected exactly one winner, got {:?}", other),
    };
    assert_eq!(won.finding_count, 1);
    assert!(matches!(lost, AnalysisError::Conflict(_)));
    assert_eq!(lost.status_code(), 409);

    let doc = h.store.document(id).unwrap();
    assert_eq!(doc.state, DocumentState::Completed);
    assert_eq!(doc.error_message, None);
    assert_eq!(h.store.findings(id).len(), 1);
    assert_eq!(h.backend.call_count(), 1);

    let logs = h.store.logs(id);
    assert_eq!(logs.len(), 1);
    assert_eq!(logs[0].status, LogStatus::Completed);
}

#[tokio::test]
async fn test_failed_attempt_only_fails_its_own_log_row() {
    let h = harness(ScriptedBackend::new().then_fail("Server error: 503"));
    let id = h.pending_document();
    let earlier = h
        .store
        .processing_logs()
        .start(id, serde_json::json!({"documentId": id}))
        .await
        .unwrap();

    h.run(id, LAB_TEXT).await.unwrap_err();

    let logs = h.store.logs(id);
    assert_eq!(logs.len(), 2);
    assert_eq!(logs[0].id, earlier);
    assert_eq!(logs[0].status, LogStatus::Processing);
    assert_eq!(logs[1].status, LogStatus::Error);
    assert!(logs[1].error_message.as_ref().unwrap().contains("503"));
}

#[tokio::test]
async fn test_other_users_document_is_not_found() {
    let h = harness(ScriptedBackend::new());
    let id = h.pending_document();

    let err = h
        .pipeline
        .run(
            &AnalysisRequest::new(id, LAB_TEXT, "PDF", "Bloodwork"),
            Some(Uuid::now_v7()),
        )
        .await
        .unwrap_err();
    assert_eq!(err.status_code(), 404);
    assert_eq!(h.state(id), DocumentState::Pending);
    assert_eq!(h.backend.call_count(), 0);
}

#[tokio::test]
async fn test_unknown_document_is_not_found() {
    let h = harness(ScriptedBackend::new());
    let err = h.run(Uuid::now_v7(), LAB_TEXT).await.unwrap_err();
    assert_eq!(err.status_code(), 404);
}

#[tokio::test]
async fn test_partial_persistence_still_completes() {
    let h = harness(ScriptedBackend::new().then_reply(
        r#"{"summary":"ok","key_findings":[{"marker":"LDL","value":"160"}],"recommendations":["Diet review"]}"#,
    ));
    h.store.fail_inserts_into("key_findings");
    let id = h.pending_document();

    let outcome = h.run(id, LAB_TEXT).await.unwrap();
    assert_eq!(
        outcome.persist,
        PersistOutcome::PartialFailure {
            failed_tables: vec!["key_findings"]
        }
    );
    assert_eq!(h.state(id), DocumentState::Completed);
    assert!(h.store.findings(id).is_empty());
    assert_eq!(h.store.recommendation_contents(id), vec!["Diet review"]);

    let payload = h.store.logs(id)[0].response_payload.clone().unwrap();
    assert_eq!(payload["persistWarnings"][0], "key_findings");
}

#[tokio::test]
async fn test_spawned_attempt_is_observed_by_poller() {
    let h = harness(ScriptedBackend::new().then_reply(
        r#"{"summary":"ok","key_findings":[{"marker":"m","value":"v"}]}"#,
    ));
    let id = h.pending_document();

    let source: Arc<dyn DocumentRepository> = Arc::new(h.store.documents());
    let source: Arc<dyn DocumentStatusSource> = Arc::new(source);
    let handle = DocumentPoller::new(source)
        .with_interval(Duration::from_millis(10))
        .start(id);

    h.pipeline
        .spawn(AnalysisRequest::new(id, LAB_TEXT, "PDF", "Bloodwork"), None)
        .await
        .unwrap();

    let terminal = tokio::time::timeout(Duration::from_secs(5), handle.wait())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(terminal.state, DocumentState::Completed);
}
