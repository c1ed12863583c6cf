//! Core traits for Second Light abstractions.
//!
//! These traits define the interfaces that concrete implementations
//! must satisfy, enabling pluggable backends and testability.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use uuid::Uuid;

use crate::error::Result;
use crate::models::*;

// =============================================================================
// DOCUMENT REPOSITORY TRAITS
// =============================================================================

/// Repository for document rows.
#[async_trait]
pub trait DocumentRepository: Send + Sync {
    /// Insert a new document in the `Pending` state.
    async fn insert(&self, req: CreateDocumentRequest) -> Result<Uuid>;

    /// Fetch a document by ID.
    async fn fetch(&self, id: Uuid) -> Result<Document>;

    /// List a user's documents, newest first.
    async fn list_for_user(&self, user_id: Uuid) -> Result<Vec<Document>>;

    /// Move a document to `next`, writing both status columns together.
    ///
    /// Fails with `InvalidTransition` when the current state is not one of
    /// `next.allowed_predecessors()`, and with `DocumentNotFound` when the
    /// row does not exist. `error_message` replaces the stored message
    /// (`None` clears it).
    async fn transition(
        &self,
        id: Uuid,
        next: DocumentState,
        error_message: Option<&str>,
    ) -> Result<()>;

    /// Store the summary and move the document to `Completed`.
    async fn complete(&self, id: Uuid, summary: &str) -> Result<()>;

    /// Count documents a user created at or after `since`.
    async fn count_created_since(&self, user_id: Uuid, since: DateTime<Utc>) -> Result<i64>;
}

/// Repository for key findings.
#[async_trait]
pub trait KeyFindingRepository: Send + Sync {
    /// Insert all findings for a document.
    async fn insert_many(&self, document_id: Uuid, findings: &[NewKeyFinding]) -> Result<()>;

    /// List a document's findings in insertion order.
    async fn list_for_document(&self, document_id: Uuid) -> Result<Vec<KeyFinding>>;
}

/// Repository for recommendations.
#[async_trait]
pub trait RecommendationRepository: Send + Sync {
    /// Insert all recommendations for a document.
    async fn insert_many(&self, document_id: Uuid, contents: &[String]) -> Result<()>;

    /// List a document's recommendations in insertion order.
    async fn list_for_document(&self, document_id: Uuid) -> Result<Vec<Recommendation>>;
}

/// Repository for the per-attempt audit trail.
#[async_trait]
pub trait ProcessingLogRepository: Send + Sync {
    /// Append a log row for a new attempt.
    async fn start(&self, document_id: Uuid, request_payload: JsonValue) -> Result<Uuid>;

    /// Mark an attempt completed.
    ///
    /// A row is finished once: a row that is no longer `processing` is
    /// reported as not found.
    async fn complete(
        &self,
        log_id: Uuid,
        response_payload: JsonValue,
        processing_time_ms: i64,
    ) -> Result<()>;

    /// Mark an attempt failed. Same once-only rule as [`complete`].
    ///
    /// [`complete`]: ProcessingLogRepository::complete
    async fn fail(&self, log_id: Uuid, error_message: &str, processing_time_ms: i64)
        -> Result<()>;

    /// List a document's log rows, newest first.
    async fn list_for_document(&self, document_id: Uuid) -> Result<Vec<ProcessingLog>>;
}

// =============================================================================
// ACCOUNT TRAITS
// =============================================================================

/// Read access to mirrored subscription state.
#[async_trait]
pub trait SubscriptionRepository: Send + Sync {
    /// Fetch the user's subscription, if any.
    async fn fetch_for_user(&self, user_id: Uuid) -> Result<Option<Subscription>>;
}

/// Resolves bearer tokens issued by the authentication provider.
#[async_trait]
pub trait SessionRepository: Send + Sync {
    /// Resolve a bearer token to a user ID. `None` for unknown or expired tokens.
    async fn resolve_token(&self, token: &str) -> Result<Option<Uuid>>;
}

// =============================================================================
// INFERENCE TRAITS
// =============================================================================

/// Backend for text generation (the Analysis Service).
#[async_trait]
pub trait GenerationBackend: Send + Sync {
    /// Generate text given a prompt.
    async fn generate(&self, prompt: &str) -> Result<String> {
        self.generate_with_system("", prompt).await
    }

    /// Generate text with system context.
    async fn generate_with_system(&self, system: &str, prompt: &str) -> Result<String>;

    /// Get the model name being used.
    fn model_name(&self) -> &str;
}
