//! Error type for one analysis attempt.

use thiserror::Error;
use uuid::Uuid;

use secondlight_core::Error as CoreError;

/// Failure of an analysis attempt, carrying its HTTP mapping.
#[derive(Debug, Error)]
pub enum AnalysisError {
    /// A required request field is missing or malformed. Nothing was mutated.
    #[error("{0}")]
    Validation(String),

    /// The text is present but too short to be worth analyzing.
    #[error("Could not extract text from the document. Please upload a clearer file.")]
    TextTooShort,

    #[error("Document not found: {0}")]
    DocumentNotFound(Uuid),

    /// Another attempt holds the document, or it already finished.
    #[error("{0}")]
    Conflict(String),

    /// The Analysis Service refused the input as non-medical.
    #[error("Not a medical document: {0}")]
    NotMedical(String),

    /// The Analysis Service refused input that looks like a lab report.
    #[error("The document looks like a lab report but could not be analyzed. Please try again.")]
    Misclassified,

    /// The reply could not be parsed or failed validation.
    #[error("{0}")]
    InvalidResponse(String),

    /// Analysis Service, persistence or other infrastructure failure.
    #[error(transparent)]
    Core(#[from] CoreError),
}

impl AnalysisError {
    /// HTTP status for this failure.
    pub fn status_code(&self) -> u16 {
        match self {
            AnalysisError::Validation(_) | AnalysisError::TextTooShort => 400,
            AnalysisError::DocumentNotFound(_) => 404,
            AnalysisError::Conflict(_) => 409,
            AnalysisError::Core(CoreError::DocumentNotFound(_)) => 404,
            _ => 500,
        }
    }

    /// Whether the failure was detected before any state was touched.
    pub fn is_validation(&self) -> bool {
        matches!(self, AnalysisError::Validation(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(AnalysisError::Validation("x".into()).status_code(), 400);
        assert_eq!(AnalysisError::TextTooShort.status_code(), 400);
        assert_eq!(AnalysisError::DocumentNotFound(Uuid::nil()).status_code(), 404);
        assert_eq!(AnalysisError::Conflict("x".into()).status_code(), 409);
        assert_eq!(AnalysisError::Misclassified.status_code(), 500);
        assert_eq!(
            AnalysisError::Core(CoreError::Inference("down".into())).status_code(),
            500
        );
        assert_eq!(
            AnalysisError::Core(CoreError::Storage("disk full".into())).status_code(),
            500
        );
    }

    #[test]
    fn test_messages() {
        assert!(AnalysisError::TextTooShort
            .to_string()
            .starts_with("Could not extract text"));
        assert_eq!(
            AnalysisError::Core(CoreError::Inference("boom".into())).to_string(),
            "Inference error: boom"
        );
        assert_eq!(
            AnalysisError::NotMedical("recipe".into()).to_string(),
            "Not a medical document: recipe"
        );
    }
}
