//! Core data models for Second Light.
//!
//! These types are shared across all Second Light crates and represent
//! the core domain entities.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;

use crate::error::Error;

// =============================================================================
// DOCUMENT LIFECYCLE
// =============================================================================

/// Lifecycle state of a document's analysis.
///
/// This is the only stored state. Both external string forms
/// (`processing_status` and the display `status`) are derived from it, so the
/// two can never disagree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentState {
    Pending,
    Processing,
    Completed,
    Error,
}

impl DocumentState {
    /// Machine-readable form stored in `documents.processing_status`.
    pub fn processing_status(self) -> &'static str {
        match self {
            DocumentState::Pending => "pending",
            DocumentState::Processing => "processing",
            DocumentState::Completed => "completed",
            DocumentState::Error => "error",
        }
    }

    /// Display form stored in `documents.status`.
    pub fn display_status(self) -> &'static str {
        match self {
            DocumentState::Pending | DocumentState::Processing => "Processing",
            DocumentState::Completed => "Analyzed",
            DocumentState::Error => "Error",
        }
    }

    /// Terminal states are never left without a new upload.
    pub fn is_terminal(self) -> bool {
        matches!(self, DocumentState::Completed | DocumentState::Error)
    }

    /// States from which `self` may be entered.
    ///
    /// `Pending -> Processing` is the only way into `Processing`, so exactly
    /// one attempt can claim a document. `Pending -> Error` covers documents
    /// rejected before any attempt claimed them.
    pub fn allowed_predecessors(self) -> &'static [DocumentState] {
        match self {
            DocumentState::Pending => &[],
            DocumentState::Processing => &[DocumentState::Pending],
            DocumentState::Completed => &[DocumentState::Processing],
            DocumentState::Error => &[DocumentState::Pending, DocumentState::Processing],
        }
    }

    /// Whether moving from `self` to `next` is a legal transition.
    pub fn can_transition_to(self, next: DocumentState) -> bool {
        next.allowed_predecessors().contains(&self)
    }

    /// Validate a transition, returning the new state.
    pub fn transition(self, next: DocumentState) -> Result<DocumentState, Error> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(Error::InvalidTransition(format!(
                "{} -> {}",
                self.processing_status(),
                next.processing_status()
            )))
        }
    }
}

impl fmt::Display for DocumentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.processing_status())
    }
}

impl FromStr for DocumentState {
    type Err = Error;

    /// Parses the machine form; the display forms are accepted as well so
    /// rows written by older clients still load.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" | "Pending" => Ok(DocumentState::Pending),
            "processing" | "Processing" => Ok(DocumentState::Processing),
            "completed" | "Analyzed" => Ok(DocumentState::Completed),
            "error" | "Error" => Ok(DocumentState::Error),
            other => Err(Error::Serialization(format!(
                "unknown processing status: {}",
                other
            ))),
        }
    }
}

/// Kind of uploaded content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DocumentKind {
    #[serde(rename = "PDF")]
    Pdf,
    #[serde(rename = "Image")]
    Image,
    #[serde(rename = "Word")]
    Word,
    #[serde(rename = "Multiple Images")]
    MultipleImages,
    #[serde(rename = "Mixed")]
    Mixed,
}

impl DocumentKind {
    pub fn as_str(self) -> &'static str {
        match self {
            DocumentKind::Pdf => "PDF",
            DocumentKind::Image => "Image",
            DocumentKind::Word => "Word",
            DocumentKind::MultipleImages => "Multiple Images",
            DocumentKind::Mixed => "Mixed",
        }
    }

    /// Combine the kinds of several files uploaded together.
    pub fn combine(kinds: &[DocumentKind]) -> Option<DocumentKind> {
        let first = *kinds.first()?;
        if kinds.len() == 1 {
            return Some(first);
        }
        if kinds.iter().all(|k| *k == DocumentKind::Image) {
            Some(DocumentKind::MultipleImages)
        } else {
            Some(DocumentKind::Mixed)
        }
    }
}

impl fmt::Display for DocumentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DocumentKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pdf" => Ok(DocumentKind::Pdf),
            "image" => Ok(DocumentKind::Image),
            "word" => Ok(DocumentKind::Word),
            "multiple images" => Ok(DocumentKind::MultipleImages),
            "mixed" => Ok(DocumentKind::Mixed),
            other => Err(Error::InvalidInput(format!("unknown document type: {}", other))),
        }
    }
}

// =============================================================================
// DOCUMENT TYPES
// =============================================================================

/// One uploaded medical file and its analysis outcome.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub id: Uuid,
    pub user_id: Uuid,
    pub title: String,
    /// Stored as free text; uploads always use a [`DocumentKind`] label.
    pub doc_type: String,
    pub state: DocumentState,
    pub summary: String,
    pub error_message: Option<String>,
    /// Storage paths of the uploaded files, in upload order.
    pub file_paths: Vec<String>,
    pub date: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Document {
    pub fn processing_status(&self) -> &'static str {
        self.state.processing_status()
    }

    pub fn status(&self) -> &'static str {
        self.state.display_status()
    }

    /// The first uploaded file, if any.
    pub fn primary_file(&self) -> Option<&str> {
        self.file_paths.first().map(String::as_str)
    }
}

/// Request for creating a document row at upload time.
#[derive(Debug, Clone)]
pub struct CreateDocumentRequest {
    pub user_id: Uuid,
    pub title: String,
    pub kind: DocumentKind,
    pub file_paths: Vec<String>,
}

// =============================================================================
// ANALYSIS RESULT TYPES
// =============================================================================

/// Clinical category of a key finding.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FindingCategory {
    Diagnosis,
    Symptom,
    Medication,
    Allergy,
    #[serde(rename = "Lab Result")]
    LabResult,
    History,
    #[default]
    Other,
}

impl FindingCategory {
    pub fn as_str(self) -> &'static str {
        match self {
            FindingCategory::Diagnosis => "Diagnosis",
            FindingCategory::Symptom => "Symptom",
            FindingCategory::Medication => "Medication",
            FindingCategory::Allergy => "Allergy",
            FindingCategory::LabResult => "Lab Result",
            FindingCategory::History => "History",
            FindingCategory::Other => "Other",
        }
    }

    /// Lenient parse of a model-supplied label. Unknown labels map to `Other`.
    pub fn from_label(label: &str) -> Self {
        let normalized: String = label
            .chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .collect::<String>()
            .to_ascii_lowercase();
        match normalized.as_str() {
            "diagnosis" | "diagnoses" => FindingCategory::Diagnosis,
            "symptom" | "symptoms" => FindingCategory::Symptom,
            "medication" | "medications" => FindingCategory::Medication,
            "allergy" | "allergies" => FindingCategory::Allergy,
            "labresult" | "labresults" | "lab" => FindingCategory::LabResult,
            "history" => FindingCategory::History,
            _ => FindingCategory::Other,
        }
    }
}

impl fmt::Display for FindingCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A stored key finding.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyFinding {
    pub id: Uuid,
    pub document_id: Uuid,
    pub marker: String,
    pub value: String,
    pub reference_range: Option<String>,
    pub interpretation: Option<String>,
    pub category: FindingCategory,
    pub created_at: DateTime<Utc>,
}

/// A key finding ready to be inserted.
///
/// `marker` and `value` are never empty; the analysis pipeline drops or
/// rejects findings before they reach this type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewKeyFinding {
    pub marker: String,
    pub value: String,
    pub reference_range: Option<String>,
    pub interpretation: Option<String>,
    pub category: FindingCategory,
}

/// A stored recommendation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Recommendation {
    pub id: Uuid,
    pub document_id: Uuid,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

// =============================================================================
// PROCESSING LOG TYPES
// =============================================================================

/// Status of one analysis attempt's audit row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogStatus {
    Processing,
    Completed,
    Error,
}

impl LogStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            LogStatus::Processing => "processing",
            LogStatus::Completed => "completed",
            LogStatus::Error => "error",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "completed" => LogStatus::Completed,
            "error" => LogStatus::Error,
            _ => LogStatus::Processing,
        }
    }
}

/// Append-only audit trail row for one analysis attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessingLog {
    pub id: Uuid,
    pub document_id: Uuid,
    pub request_payload: JsonValue,
    pub response_payload: Option<JsonValue>,
    pub status: LogStatus,
    pub error_message: Option<String>,
    pub processing_time_ms: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// =============================================================================
// SUBSCRIPTION TYPES
// =============================================================================

/// Billing state mirrored from the payment provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubscriptionStatus {
    Active,
    Trialing,
    Cancelled,
    Inactive,
}

impl SubscriptionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            SubscriptionStatus::Active => "active",
            SubscriptionStatus::Trialing => "trialing",
            SubscriptionStatus::Cancelled => "cancelled",
            SubscriptionStatus::Inactive => "inactive",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "active" => SubscriptionStatus::Active,
            "trialing" => SubscriptionStatus::Trialing,
            "cancelled" | "canceled" => SubscriptionStatus::Cancelled,
            _ => SubscriptionStatus::Inactive,
        }
    }

    /// Whether new documents may be analyzed under this status.
    pub fn allows_uploads(self) -> bool {
        matches!(self, SubscriptionStatus::Active | SubscriptionStatus::Trialing)
    }
}

/// A user's subscription record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Subscription {
    pub user_id: Uuid,
    pub status: SubscriptionStatus,
    pub subscription_start_date: DateTime<Utc>,
    pub next_billing_date: Option<DateTime<Utc>>,
}

/// Quota view derived from a subscription and the user's document count.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuotaSummary {
    pub status: SubscriptionStatus,
    pub reports_remaining: i64,
    pub next_billing_date: Option<DateTime<Utc>>,
}

impl QuotaSummary {
    /// `reports_remaining = max(0, allowance - used)`.
    pub fn from_usage(subscription: Option<&Subscription>, used: i64, allowance: i64) -> Self {
        match subscription {
            Some(sub) => Self {
                status: sub.status,
                reports_remaining: (allowance - used).max(0),
                next_billing_date: sub.next_billing_date,
            },
            None => Self {
                status: SubscriptionStatus::Inactive,
                reports_remaining: 0,
                next_billing_date: None,
            },
        }
    }

    /// Whether one more document may be uploaded.
    pub fn admits_upload(&self) -> bool {
        self.status.allows_uploads() && self.reports_remaining > 0
    }
}
