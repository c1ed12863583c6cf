//! Analysis Requestor: one analysis attempt for one document.
//!
//! The attempt is strictly sequential: validate, claim the document
//! (`pending -> processing`), append a processing log row, call the Analysis
//! Service, optionally call it again for findings, complete, persist. Only
//! the attempt that won the claim writes to the document. Any failure after
//! the claim moves the document to `Error` and fails that attempt's own log
//! row. There is no automatic retry of the whole attempt.

use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value as JsonValue};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn, Span};
use uuid::Uuid;

use secondlight_core::defaults::{LAB_KEYWORD_OVERRIDE, MIN_TEXT_CHARS};
use secondlight_core::{
    DocumentRepository, DocumentState, Error as CoreError, GenerationBackend,
    KeyFindingRepository, NewKeyFinding, ProcessingLogRepository, RecommendationRepository,
};
use secondlight_db::Database;

use crate::error::AnalysisError;
use crate::prompts::{analysis_prompt, findings_prompt, ANALYSIS_SYSTEM_PROMPT, FINDINGS_SYSTEM_PROMPT};
use crate::response::{parse_analysis, parse_findings};

/// Body of `POST /process-document`.
///
/// Every field is optional on the wire so that a missing field is reported
/// as a validation error instead of a deserialization failure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisRequest {
    pub document_id: Option<String>,
    pub document_text: Option<String>,
    pub document_type: Option<String>,
    pub document_title: Option<String>,
}

impl AnalysisRequest {
    pub fn new(
        document_id: Uuid,
        text: impl Into<String>,
        document_type: impl Into<String>,
        title: impl Into<String>,
    ) -> Self {
        Self {
            document_id: Some(document_id.to_string()),
            document_text: Some(text.into()),
            document_type: Some(document_type.into()),
            document_title: Some(title.into()),
        }
    }

    /// Presence checks, then the id parse. Touches nothing.
    fn validate(&self) -> Result<ValidRequest<'_>, AnalysisError> {
        let id = required(&self.document_id, "Document ID is required")?;
        let text = required(&self.document_text, "Document text is required for analysis")?;
        let document_type = required(&self.document_type, "Document type is required")?;
        let title = required(&self.document_title, "Document title is required")?;

        let document_id = Uuid::parse_str(id.trim()).map_err(|_| {
            AnalysisError::Validation(format!("Document ID is not a valid UUID: {}", id))
        })?;

        Ok(ValidRequest {
            document_id,
            text,
            document_type,
            title,
        })
    }
}

fn required<'a>(field: &'a Option<String>, message: &str) -> Result<&'a str, AnalysisError> {
    match field.as_deref() {
        Some(v) if !v.trim().is_empty() => Ok(v),
        _ => Err(AnalysisError::Validation(message.to_string())),
    }
}

struct ValidRequest<'a> {
    document_id: Uuid,
    text: &'a str,
    document_type: &'a str,
    title: &'a str,
}

/// Pipeline tunables.
#[derive(Debug, Clone)]
pub struct AnalysisConfig {
    /// Trimmed text must be longer than this many characters.
    pub min_text_chars: usize,
    /// Report model refusals of lab-looking text as misclassifications.
    pub lab_keyword_override: bool,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            min_text_chars: MIN_TEXT_CHARS,
            lab_keyword_override: LAB_KEYWORD_OVERRIDE,
        }
    }
}

impl AnalysisConfig {
    /// Create config from environment variables (with defaults).
    ///
    /// | Variable | Default | Description |
    /// |----------|---------|-------------|
    /// | `ANALYSIS_MIN_TEXT_CHARS` | `20` | Minimum trimmed text length |
    /// | `ANALYSIS_LAB_KEYWORD_OVERRIDE` | `true` | Lab-keyword refusal override |
    pub fn from_env() -> Self {
        let min_text_chars = std::env::var("ANALYSIS_MIN_TEXT_CHARS")
            .ok()
            .and_then(|v| v.parse::<usize>().ok())
            .unwrap_or(MIN_TEXT_CHARS);

        let lab_keyword_override = std::env::var("ANALYSIS_LAB_KEYWORD_OVERRIDE")
            .map(|v| v != "false" && v != "0")
            .unwrap_or(LAB_KEYWORD_OVERRIDE);

        Self {
            min_text_chars,
            lab_keyword_override,
        }
    }

    pub fn with_min_text_chars(mut self, n: usize) -> Self {
        self.min_text_chars = n;
        self
    }

    pub fn with_lab_keyword_override(mut self, enabled: bool) -> Self {
        self.lab_keyword_override = enabled;
        self
    }
}

/// The repositories one attempt writes to.
#[derive(Clone)]
pub struct AnalysisStores {
    pub documents: Arc<dyn DocumentRepository>,
    pub key_findings: Arc<dyn KeyFindingRepository>,
    pub recommendations: Arc<dyn RecommendationRepository>,
    pub processing_logs: Arc<dyn ProcessingLogRepository>,
}

impl AnalysisStores {
    pub fn from_database(db: &Database) -> Self {
        Self {
            documents: Arc::new(db.documents.clone()),
            key_findings: Arc::new(db.key_findings.clone()),
            recommendations: Arc::new(db.recommendations.clone()),
            processing_logs: Arc::new(db.processing_logs.clone()),
        }
    }
}

/// Result of writing findings and recommendations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PersistOutcome {
    Complete,
    /// Some secondary writes failed; the document still completes.
    PartialFailure { failed_tables: Vec<&'static str> },
}

impl PersistOutcome {
    pub fn is_complete(&self) -> bool {
        matches!(self, PersistOutcome::Complete)
    }
}

/// A successful attempt.
#[derive(Debug, Clone)]
pub struct AnalysisOutcome {
    pub document_id: Uuid,
    pub summary: String,
    pub processing_time_ms: i64,
    pub finding_count: usize,
    pub recommendation_count: usize,
    pub persist: PersistOutcome,
}

/// Runs analysis attempts against the configured stores and backend.
#[derive(Clone)]
pub struct AnalysisPipeline {
    stores: AnalysisStores,
    backend: Arc<dyn GenerationBackend>,
    config: AnalysisConfig,
}

impl AnalysisPipeline {
    pub fn new(
        stores: AnalysisStores,
        backend: Arc<dyn GenerationBackend>,
        config: AnalysisConfig,
    ) -> Self {
        Self {
            stores,
            backend,
            config,
        }
    }

    pub fn config(&self) -> &AnalysisConfig {
        &self.config
    }

    /// Run one attempt.
    ///
    /// When `acting_user` is given the document must belong to that user,
    /// otherwise it is reported as not found.
    #[instrument(
        skip(self, request),
        fields(
            subsystem = "analysis",
            component = "requestor",
            op = "analyze",
            document_id = tracing::field::Empty
        )
    )]
    pub async fn run(
        &self,
        request: &AnalysisRequest,
        acting_user: Option<Uuid>,
    ) -> Result<AnalysisOutcome, AnalysisError> {
        let req = request.validate()?;
        let document_id = req.document_id;
        Span::current().record("document_id", tracing::field::display(document_id));

        if let Some(user_id) = acting_user {
            self.check_owner(document_id, user_id).await?;
        }

        self.claim(document_id).await?;
        let start = Instant::now();

        if req.text.trim().chars().count() <= self.config.min_text_chars {
            let err = AnalysisError::TextTooShort;
            self.mark_failed(document_id, None, &err.to_string(), elapsed_ms(start))
                .await;
            return Err(err);
        }

        let log_id = match self
            .stores
            .processing_logs
            .start(
                document_id,
                json!({
                    "documentId": document_id,
                    "documentType": req.document_type,
                    "documentTitle": req.title,
                    "textLength": req.text.chars().count(),
                    "model": self.backend.model_name(),
                }),
            )
            .await
        {
            Ok(log_id) => log_id,
            Err(e) => {
                let err = AnalysisError::from(e);
                self.mark_failed(document_id, None, &err.to_string(), elapsed_ms(start))
                    .await;
                return Err(err);
            }
        };

        match self.attempt(&req, log_id, start).await {
            Ok(outcome) => {
                info!(
                    duration_ms = outcome.processing_time_ms,
                    finding_count = outcome.finding_count,
                    recommendation_count = outcome.recommendation_count,
                    model = self.backend.model_name(),
                    "Document analyzed"
                );
                Ok(outcome)
            }
            Err(err) => {
                let elapsed = elapsed_ms(start);
                warn!(error = %err, duration_ms = elapsed, "Analysis failed");
                self.mark_failed(document_id, Some(log_id), &err.to_string(), elapsed)
                    .await;
                Err(err)
            }
        }
    }

    /// Run an attempt on a background task. The outcome is only logged.
    pub fn spawn(&self, request: AnalysisRequest, acting_user: Option<Uuid>) -> JoinHandle<()> {
        let pipeline = self.clone();
        tokio::spawn(async move {
            if let Err(e) = pipeline.run(&request, acting_user).await {
                debug!(
                    subsystem = "analysis",
                    status = e.status_code(),
                    error = %e,
                    "Background analysis ended with error"
                );
            }
        })
    }

    async fn check_owner(&self, document_id: Uuid, user_id: Uuid) -> Result<(), AnalysisError> {
        match self.stores.documents.fetch(document_id).await {
            Ok(doc) if doc.user_id == user_id => Ok(()),
            Ok(_) | Err(CoreError::DocumentNotFound(_)) => {
                Err(AnalysisError::DocumentNotFound(document_id))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Move the document from `pending` to `processing`. Losing the claim,
    /// to another attempt or to a terminal state, is a conflict and leaves
    /// the document untouched.
    async fn claim(&self, document_id: Uuid) -> Result<(), AnalysisError> {
        self.stores
            .documents
            .transition(document_id, DocumentState::Processing, None)
            .await
            .map_err(|e| match e {
                CoreError::InvalidTransition(detail) => AnalysisError::Conflict(format!(
                    "Document {} is already being analyzed or has finished ({})",
                    document_id, detail
                )),
                other => other.into(),
            })
    }

    async fn attempt(
        &self,
        req: &ValidRequest<'_>,
        log_id: Uuid,
        start: Instant,
    ) -> Result<AnalysisOutcome, AnalysisError> {
        let document_id = req.document_id;

        let prompt = analysis_prompt(req.title, req.document_type, req.text);
        debug!(prompt_len = prompt.len(), "Calling analysis service");
        let reply = self
            .backend
            .generate_with_system(ANALYSIS_SYSTEM_PROMPT, &prompt)
            .await?;
        debug!(response_len = reply.len(), "Analysis reply received");

        let parsed = parse_analysis(&reply, req.text, self.config.lab_keyword_override)?;

        let mut used_fallback = false;
        let findings = if parsed.key_findings.is_empty() {
            used_fallback = true;
            self.fallback_findings(req.text).await
        } else {
            parsed.key_findings
        };

        self.stores
            .documents
            .complete(document_id, &parsed.summary)
            .await?;

        let persist = self
            .persist_results(document_id, &findings, &parsed.recommendations)
            .await;

        let processing_time_ms = elapsed_ms(start);
        let mut response_payload = parsed.raw;
        if let Some(obj) = response_payload.as_object_mut() {
            if used_fallback {
                obj.insert("fallbackFindings".to_string(), json!(findings.len()));
            }
            if let PersistOutcome::PartialFailure { failed_tables } = &persist {
                obj.insert("persistWarnings".to_string(), json!(failed_tables));
            }
        }
        if let Err(e) = self
            .stores
            .processing_logs
            .complete(log_id, response_payload, processing_time_ms)
            .await
        {
            warn!(log_id = %log_id, error = %e, "Failed to complete processing log");
        }

        Ok(AnalysisOutcome {
            document_id,
            summary: parsed.summary,
            processing_time_ms,
            finding_count: findings.len(),
            recommendation_count: parsed.recommendations.len(),
            persist,
        })
    }

    /// Second, narrower call used when the main reply had no findings.
    /// Never fails the attempt.
    async fn fallback_findings(&self, text: &str) -> Vec<NewKeyFinding> {
        debug!(op = "fallback_findings", "No findings in reply, asking for findings only");
        let reply = match self
            .backend
            .generate_with_system(FINDINGS_SYSTEM_PROMPT, &findings_prompt(text))
            .await
        {
            Ok(reply) => reply,
            Err(e) => {
                warn!(op = "fallback_findings", error = %e, "Findings call failed");
                return Vec::new();
            }
        };

        match parse_findings(&reply) {
            Ok(findings) => findings,
            Err(e) => {
                warn!(op = "fallback_findings", error = %e, "Findings reply unusable");
                Vec::new()
            }
        }
    }

    /// Best-effort secondary writes.
    async fn persist_results(
        &self,
        document_id: Uuid,
        findings: &[NewKeyFinding],
        recommendations: &[String],
    ) -> PersistOutcome {
        let mut failed_tables = Vec::new();

        if !findings.is_empty() {
            if let Err(e) = self
                .stores
                .key_findings
                .insert_many(document_id, findings)
                .await
            {
                warn!(op = "persist", table = "key_findings", error = %e, "Insert failed");
                failed_tables.push("key_findings");
            }
        }

        if !recommendations.is_empty() {
            if let Err(e) = self
                .stores
                .recommendations
                .insert_many(document_id, recommendations)
                .await
            {
                warn!(op = "persist", table = "recommendations", error = %e, "Insert failed");
                failed_tables.push("recommendations");
            }
        }

        if failed_tables.is_empty() {
            PersistOutcome::Complete
        } else {
            PersistOutcome::PartialFailure { failed_tables }
        }
    }

    async fn mark_failed(
        &self,
        document_id: Uuid,
        log_id: Option<Uuid>,
        message: &str,
        elapsed: i64,
    ) {
        if let Err(e) = self
            .stores
            .documents
            .transition(document_id, DocumentState::Error, Some(message))
            .await
        {
            error!(error = %e, "Failed to mark document as error");
        }

        let Some(log_id) = log_id else {
            return;
        };
        if let Err(e) = self
            .stores
            .processing_logs
            .fail(log_id, message, elapsed)
            .await
        {
            warn!(log_id = %log_id, error = %e, "Failed to update processing log");
        }
    }
}

fn elapsed_ms(start: Instant) -> i64 {
    i64::try_from(start.elapsed().as_millis()).unwrap_or(i64::MAX)
}

/// Response payload helper for callers that render a 200 body.
pub fn success_body(outcome: &AnalysisOutcome) -> JsonValue {
    json!({
        "message": "Document processed successfully",
        "summary": outcome.summary,
        "processingTime": outcome.processing_time_ms,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_deserializes_camel_case() {
        let req: AnalysisRequest = serde_json::from_value(json!({
            "documentId": "0190c1a4-0000-7000-8000-000000000001",
            "documentText": "text",
            "documentType": "PDF",
            "documentTitle": "t"
        }))
        .unwrap();
        assert_eq!(req.document_type.as_deref(), Some("PDF"));
        assert!(req.validate().is_ok());
    }

    #[test]
    fn test_missing_fields_in_order() {
        let mut req = AnalysisRequest::default();
        let err = req.validate().err().unwrap();
        assert_eq!(err.to_string(), "Document ID is required");

        req.document_id = Some(Uuid::nil().to_string());
        req.document_text = Some("   ".to_string());
        let err = req.validate().err().unwrap();
        assert_eq!(err.to_string(), "Document text is required for analysis");

        req.document_text = Some("text".to_string());
        let err = req.validate().err().unwrap();
        assert_eq!(err.to_string(), "Document type is required");

        req.document_type = Some("PDF".to_string());
        let err = req.validate().err().unwrap();
        assert_eq!(err.to_string(), "Document title is required");
    }

    #[test]
    fn test_invalid_uuid_is_validation_error() {
        let mut req = AnalysisRequest::new(Uuid::nil(), "text", "PDF", "t");
        req.document_id = Some("d1".to_string());
        let err = req.validate().err().unwrap();
        assert!(err.is_validation());
        assert!(err.to_string().contains("d1"));
    }

    #[test]
    fn test_success_body_shape() {
        let outcome = AnalysisOutcome {
            document_id: Uuid::nil(),
            summary: "ok".to_string(),
            processing_time_ms: 42,
            finding_count: 0,
            recommendation_count: 0,
            persist: PersistOutcome::Complete,
        };
        let body = success_body(&outcome);
        assert_eq!(body["summary"], "ok");
        assert_eq!(body["processingTime"], 42);
        assert!(body["message"].is_string());
    }

    #[test]
    fn test_config_builders() {
        let config = AnalysisConfig::default()
            .with_min_text_chars(5)
            .with_lab_keyword_override(false);
        assert_eq!(config.min_text_chars, 5);
        assert!(!config.lab_keyword_override);
        assert_eq!(AnalysisConfig::default().min_text_chars, 20);
    }

    #[test]
    fn test_persist_outcome() {
        assert!(PersistOutcome::Complete.is_complete());
        assert!(!PersistOutcome::PartialFailure {
            failed_tables: vec!["key_findings"]
        }
        .is_complete());
    }
}
