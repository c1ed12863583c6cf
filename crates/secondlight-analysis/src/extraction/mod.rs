//! Text Extractor: turns uploaded files into the text the Analysis
//! Requestor analyzes.
//!
//! Each supported file kind has a [`TextExtractor`] backed by an external
//! tool (`pdftotext`, `tesseract`, `pandoc`). Tools run with a per-command
//! timeout. Extraction happens before a document row exists, so failures
//! here never touch document state.

mod image;
mod pdf;
mod word;

use std::collections::HashMap;
use std::process::Output;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::process::Command;
use tracing::debug;

use secondlight_core::{DocumentKind, Error as CoreError};

pub use image::ImageOcrExtractor;
pub use pdf::{join_pdf_pages, PdfTextExtractor};
pub use word::WordExtractor;

/// Extraction failure the uploader must act on.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ExtractionError {
    #[error("This PDF is password protected. Please provide the password.")]
    PasswordRequired,

    #[error("Incorrect password")]
    IncorrectPassword,

    #[error("Could not read file: {0}")]
    Unreadable(String),

    #[error("Unsupported file type: {0}")]
    UnsupportedType(String),

    /// The external tool is missing, timed out or crashed.
    #[error("Extraction tool error: {0}")]
    Tool(String),
}

impl ExtractionError {
    /// Stable machine-readable code for API responses.
    pub fn code(&self) -> &'static str {
        match self {
            ExtractionError::PasswordRequired => "password_required",
            ExtractionError::IncorrectPassword => "incorrect_password",
            ExtractionError::Unreadable(_) => "unreadable",
            ExtractionError::UnsupportedType(_) => "unsupported_type",
            ExtractionError::Tool(_) => "extraction_failed",
        }
    }
}

impl From<ExtractionError> for CoreError {
    fn from(err: ExtractionError) -> Self {
        CoreError::Extraction(err.to_string())
    }
}

/// Kind of a single uploaded file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FileKind {
    Pdf,
    Image,
    Word,
}

impl FileKind {
    pub fn document_kind(self) -> DocumentKind {
        match self {
            FileKind::Pdf => DocumentKind::Pdf,
            FileKind::Image => DocumentKind::Image,
            FileKind::Word => DocumentKind::Word,
        }
    }
}

/// Result of magic-byte detection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DetectedFile {
    pub kind: FileKind,
    pub mime_type: &'static str,
    pub extension: &'static str,
}

const DOCX_MIME: &str = "application/vnd.openxmlformats-officedocument.wordprocessingml.document";

/// Detect a file's kind from its leading bytes. The client-supplied name
/// and content type are never trusted.
pub fn detect_file(data: &[u8]) -> Result<DetectedFile, ExtractionError> {
    if data.is_empty() {
        return Err(ExtractionError::Unreadable("file is empty".to_string()));
    }

    let Some(detected) = infer::get(data) else {
        return Err(ExtractionError::UnsupportedType("unknown".to_string()));
    };

    let kind = match detected.mime_type() {
        "application/pdf" => FileKind::Pdf,
        DOCX_MIME => FileKind::Word,
        _ if matches!(detected.matcher_type(), infer::MatcherType::Image) => FileKind::Image,
        other => return Err(ExtractionError::UnsupportedType(other.to_string())),
    };

    Ok(DetectedFile {
        kind,
        mime_type: detected.mime_type(),
        extension: detected.extension(),
    })
}

/// Extracts plain text from one file kind.
#[async_trait]
pub trait TextExtractor: Send + Sync {
    /// The file kind this extractor handles.
    fn kind(&self) -> FileKind;

    /// Extract text. `password` is only meaningful for PDFs.
    async fn extract(&self, data: &[u8], password: Option<&str>) -> Result<String, ExtractionError>;

    /// Whether the backing tool is installed.
    async fn health_check(&self) -> bool;

    fn name(&self) -> &str;
}

/// Run a command with a timeout, returning its raw output.
pub(crate) async fn run_with_timeout(
    cmd: &mut Command,
    tool: &str,
    timeout_secs: u64,
) -> Result<Output, ExtractionError> {
    tokio::time::timeout(Duration::from_secs(timeout_secs), cmd.output())
        .await
        .map_err(|_| ExtractionError::Tool(format!("{} timed out after {}s", tool, timeout_secs)))?
        .map_err(|e| ExtractionError::Tool(format!("failed to execute {}: {}", tool, e)))
}

/// Registry mapping file kinds to their extractors.
pub struct ExtractionRegistry {
    extractors: HashMap<FileKind, Arc<dyn TextExtractor>>,
}

impl ExtractionRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            extractors: HashMap::new(),
        }
    }

    /// Registry with the PDF, image and Word extractors.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(PdfTextExtractor::new()));
        registry.register(Arc::new(ImageOcrExtractor::new()));
        registry.register(Arc::new(WordExtractor::new()));
        registry
    }

    /// Register an extractor. Replaces any existing one for the same kind.
    pub fn register(&mut self, extractor: Arc<dyn TextExtractor>) {
        self.extractors.insert(extractor.kind(), extractor);
    }

    /// Extract one file.
    pub async fn extract(
        &self,
        kind: FileKind,
        data: &[u8],
        password: Option<&str>,
    ) -> Result<String, ExtractionError> {
        let extractor = self
            .extractors
            .get(&kind)
            .ok_or_else(|| ExtractionError::UnsupportedType(format!("{:?}", kind)))?;
        debug!(
            subsystem = "extraction",
            extractor = extractor.name(),
            size = data.len(),
            "Extracting text"
        );
        extractor.extract(data, password).await
    }

    /// Extract several files and join their texts with a blank line.
    pub async fn extract_all(
        &self,
        files: &[(FileKind, &[u8])],
        password: Option<&str>,
    ) -> Result<String, ExtractionError> {
        let mut texts = Vec::with_capacity(files.len());
        for (kind, data) in files {
            let text = self.extract(*kind, data, password).await?;
            let text = text.trim();
            if !text.is_empty() {
                texts.push(text.to_string());
            }
        }
        Ok(texts.join("\n\n"))
    }

    /// Run health checks on all registered extractors.
    pub async fn health_check_all(&self) -> HashMap<FileKind, bool> {
        let mut results = HashMap::new();
        for (kind, extractor) in &self.extractors {
            results.insert(*kind, extractor.health_check().await);
        }
        results
    }
}

impl Default for ExtractionRegistry {
    fn default() -> Self {
        Self::new()
    }
}
