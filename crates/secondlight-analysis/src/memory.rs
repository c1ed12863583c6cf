//! In-memory repositories.
//!
//! They apply the same transition rules as the PostgreSQL repositories and
//! back the pipeline and HTTP tests. Inserts into a table can be made to
//! fail to exercise partial persistence.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use uuid::Uuid;

use secondlight_core::{
    new_v7, CreateDocumentRequest, Document, DocumentRepository, DocumentState, Error, KeyFinding,
    KeyFindingRepository, LogStatus, NewKeyFinding, ProcessingLog, ProcessingLogRepository,
    Recommendation, RecommendationRepository, Result, SessionRepository, Subscription,
    SubscriptionRepository,
};

use crate::requestor::AnalysisStores;

#[derive(Default)]
struct State {
    documents: Vec<Document>,
    findings: Vec<KeyFinding>,
    recommendations: Vec<Recommendation>,
    logs: Vec<ProcessingLog>,
    subscriptions: HashMap<Uuid, Subscription>,
    sessions: HashMap<String, Uuid>,
    failing_tables: HashSet<&'static str>,
}

type Shared = Arc<Mutex<State>>;

fn lock(state: &Mutex<State>) -> MutexGuard<'_, State> {
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Shared in-memory backing store. Cloning shares the data.
#[derive(Clone, Default)]
pub struct MemoryStore {
    state: Shared,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn documents(&self) -> MemoryDocuments {
        MemoryDocuments(self.state.clone())
    }

    pub fn key_findings(&self) -> MemoryKeyFindings {
        MemoryKeyFindings(self.state.clone())
    }

    pub fn recommendations(&self) -> MemoryRecommendations {
        MemoryRecommendations(self.state.clone())
    }

    pub fn processing_logs(&self) -> MemoryProcessingLogs {
        MemoryProcessingLogs(self.state.clone())
    }

    pub fn subscriptions(&self) -> MemorySubscriptions {
        MemorySubscriptions(self.state.clone())
    }

    pub fn sessions(&self) -> MemorySessions {
        MemorySessions(self.state.clone())
    }

    /// The four stores an analysis attempt writes to.
    pub fn analysis_stores(&self) -> AnalysisStores {
        AnalysisStores {
            documents: Arc::new(self.documents()),
            key_findings: Arc::new(self.key_findings()),
            recommendations: Arc::new(self.recommendations()),
            processing_logs: Arc::new(self.processing_logs()),
        }
    }

    /// Make every later insert into `table` fail.
    /// Known tables: `key_findings`, `recommendations`.
    pub fn fail_inserts_into(&self, table: &'static str) {
        lock(&self.state).failing_tables.insert(table);
    }

    /// Insert a document row in the given state.
    pub fn seed_document(&self, user_id: Uuid, title: &str, state: DocumentState) -> Uuid {
        let now = Utc::now();
        let id = new_v7();
        lock(&self.state).documents.push(Document {
            id,
            user_id,
            title: title.to_string(),
            doc_type: "PDF".to_string(),
            state,
            summary: String::new(),
            error_message: None,
            file_paths: Vec::new(),
            date: now,
            created_at: now,
            updated_at: now,
        });
        id
    }

    pub fn add_subscription(&self, subscription: Subscription) {
        lock(&self.state)
            .subscriptions
            .insert(subscription.user_id, subscription);
    }

    pub fn add_session(&self, token: &str, user_id: Uuid) {
        lock(&self.state)
            .sessions
            .insert(token.to_string(), user_id);
    }

    /// Snapshot of a document, if present.
    pub fn document(&self, id: Uuid) -> Option<Document> {
        lock(&self.state).documents.iter().find(|d| d.id == id).cloned()
    }

    pub fn findings(&self, document_id: Uuid) -> Vec<KeyFinding> {
        lock(&self.state)
            .findings
            .iter()
            .filter(|f| f.document_id == document_id)
            .cloned()
            .collect()
    }

    pub fn recommendation_contents(&self, document_id: Uuid) -> Vec<String> {
        lock(&self.state)
            .recommendations
            .iter()
            .filter(|r| r.document_id == document_id)
            .map(|r| r.content.clone())
            .collect()
    }

    /// Log rows for a document, oldest first.
    pub fn logs(&self, document_id: Uuid) -> Vec<ProcessingLog> {
        lock(&self.state)
            .logs
            .iter()
            .filter(|l| l.document_id == document_id)
            .cloned()
            .collect()
    }

    pub fn document_count(&self) -> usize {
        lock(&self.state).documents.len()
    }
}

fn apply_transition(
    state: &mut State,
    id: Uuid,
    next: DocumentState,
    summary: Option<&str>,
    error_message: Option<&str>,
) -> Result<()> {
    let doc = state
        .documents
        .iter_mut()
        .find(|d| d.id == id)
        .ok_or(Error::DocumentNotFound(id))?;
    doc.state = doc.state.transition(next)?;
    if let Some(summary) = summary {
        doc.summary = summary.to_string();
    }
    doc.error_message = error_message.map(str::to_string);
    doc.updated_at = Utc::now();
    Ok(())
}

#[derive(Clone)]
pub struct MemoryDocuments(Shared);

#[async_trait]
impl DocumentRepository for MemoryDocuments {
    async fn insert(&self, req: CreateDocumentRequest) -> Result<Uuid> {
        let now = Utc::now();
        let id = new_v7();
        lock(&self.0).documents.push(Document {
            id,
            user_id: req.user_id,
            title: req.title,
            doc_type: req.kind.as_str().to_string(),
            state: DocumentState::Pending,
            summary: String::new(),
            error_message: None,
            file_paths: req.file_paths,
            date: now,
            created_at: now,
            updated_at: now,
        });
        Ok(id)
    }

    async fn fetch(&self, id: Uuid) -> Result<Document> {
        lock(&self.0)
            .documents
            .iter()
            .find(|d| d.id == id)
            .cloned()
            .ok_or(Error::DocumentNotFound(id))
    }

    async fn list_for_user(&self, user_id: Uuid) -> Result<Vec<Document>> {
        let mut docs: Vec<Document> = lock(&self.0)
            .documents
            .iter()
            .filter(|d| d.user_id == user_id)
            .cloned()
            .collect();
        docs.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(docs)
    }

    async fn transition(
        &self,
        id: Uuid,
        next: DocumentState,
        error_message: Option<&str>,
    ) -> Result<()> {
        apply_transition(&mut lock(&self.0), id, next, None, error_message)
    }

    async fn complete(&self, id: Uuid, summary: &str) -> Result<()> {
        apply_transition(
            &mut lock(&self.0),
            id,
            DocumentState::Completed,
            Some(summary),
            None,
        )
    }

    async fn count_created_since(&self, user_id: Uuid, since: DateTime<Utc>) -> Result<i64> {
        let count = lock(&self.0)
            .documents
            .iter()
            .filter(|d| d.user_id == user_id && d.created_at >= since)
            .count();
        Ok(count as i64)
    }
}

#[derive(Clone)]
pub struct MemoryKeyFindings(Shared);

#[async_trait]
impl KeyFindingRepository for MemoryKeyFindings {
    async fn insert_many(&self, document_id: Uuid, findings: &[NewKeyFinding]) -> Result<()> {
        let mut state = lock(&self.0);
        if state.failing_tables.contains("key_findings") {
            return Err(Error::Internal("key_findings insert rejected".to_string()));
        }
        let now = Utc::now();
        state.findings.extend(findings.iter().map(|f| KeyFinding {
            id: new_v7(),
            document_id,
            marker: f.marker.clone(),
            value: f.value.clone(),
            reference_range: f.reference_range.clone(),
            interpretation: f.interpretation.clone(),
            category: f.category,
            created_at: now,
        }));
        Ok(())
    }

    async fn list_for_document(&self, document_id: Uuid) -> Result<Vec<KeyFinding>> {
        Ok(lock(&self.0)
            .findings
            .iter()
            .filter(|f| f.document_id == document_id)
            .cloned()
            .collect())
    }
}

#[derive(Clone)]
pub struct MemoryRecommendations(Shared);

#[async_trait]
impl RecommendationRepository for MemoryRecommendations {
    async fn insert_many(&self, document_id: Uuid, contents: &[String]) -> Result<()> {
        let mut state = lock(&self.0);
        if state.failing_tables.contains("recommendations") {
            return Err(Error::Internal("recommendations insert rejected".to_string()));
        }
        let now = Utc::now();
        state
            .recommendations
            .extend(contents.iter().map(|content| Recommendation {
                id: new_v7(),
                document_id,
                content: content.clone(),
                created_at: now,
            }));
        Ok(())
    }

    async fn list_for_document(&self, document_id: Uuid) -> Result<Vec<Recommendation>> {
        Ok(lock(&self.0)
            .recommendations
            .iter()
            .filter(|r| r.document_id == document_id)
            .cloned()
            .collect())
    }
}

#[derive(Clone)]
pub struct MemoryProcessingLogs(Shared);

/// A log row that has not been finished yet.
fn open_log(state: &mut State, log_id: Uuid) -> Result<&mut ProcessingLog> {
    state
        .logs
        .iter_mut()
        .find(|l| l.id == log_id && l.status == LogStatus::Processing)
        .ok_or_else(|| Error::NotFound(format!("open processing log {}", log_id)))
}

#[async_trait]
impl ProcessingLogRepository for MemoryProcessingLogs {
    async fn start(&self, document_id: Uuid, request_payload: JsonValue) -> Result<Uuid> {
        let now = Utc::now();
        let id = new_v7();
        lock(&self.0).logs.push(ProcessingLog {
            id,
            document_id,
            request_payload,
            response_payload: None,
            status: LogStatus::Processing,
            error_message: None,
            processing_time_ms: None,
            created_at: now,
            updated_at: now,
        });
        Ok(id)
    }

    async fn complete(
        &self,
        log_id: Uuid,
        response_payload: JsonValue,
        processing_time_ms: i64,
    ) -> Result<()> {
        let mut state = lock(&self.0);
        let log = open_log(&mut state, log_id)?;
        log.response_payload = Some(response_payload);
        log.status = LogStatus::Completed;
        log.processing_time_ms = Some(processing_time_ms);
        log.updated_at = Utc::now();
        Ok(())
    }

    async fn fail(
        &self,
        log_id: Uuid,
        error_message: &str,
        processing_time_ms: i64,
    ) -> Result<()> {
        let mut state = lock(&self.0);
        let log = open_log(&mut state, log_id)?;
        log.status = LogStatus::Error;
        log.error_message = Some(error_message.to_string());
        log.processing_time_ms = Some(processing_time_ms);
        log.updated_at = Utc::now();
        Ok(())
    }

    async fn list_for_document(&self, document_id: Uuid) -> Result<Vec<ProcessingLog>> {
        Ok(lock(&self.0)
            .logs
            .iter()
            .rev()
            .filter(|l| l.document_id == document_id)
            .cloned()
            .collect())
    }
}

#[derive(Clone)]
pub struct MemorySubscriptions(Shared);

#[async_trait]
impl SubscriptionRepository for MemorySubscriptions {
    async fn fetch_for_user(&self, user_id: Uuid) -> Result<Option<Subscription>> {
        Ok(lock(&self.0).subscriptions.get(&user_id).cloned())
    }
}

#[derive(Clone)]
pub struct MemorySessions(Shared);

#[async_trait]
impl SessionRepository for MemorySessions {
    async fn resolve_token(&self, token: &str) -> Result<Option<Uuid>> {
        Ok(lock(&self.0).sessions.get(token).copied())
    }
}
