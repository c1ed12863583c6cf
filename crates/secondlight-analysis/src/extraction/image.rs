//! Image OCR with `tesseract`.

use std::io::Write;

use async_trait::async_trait;
use tempfile::NamedTempFile;
use tokio::process::Command;
use tracing::debug;

use secondlight_core::defaults::{EXTRACTION_CMD_TIMEOUT_SECS, OCR_LANGUAGE};

use super::{run_with_timeout, ExtractionError, FileKind, TextExtractor};

/// Runs optical character recognition over a single image.
pub struct ImageOcrExtractor {
    language: String,
    timeout_secs: u64,
}

impl ImageOcrExtractor {
    pub fn new() -> Self {
        Self {
            language: OCR_LANGUAGE.to_string(),
            timeout_secs: EXTRACTION_CMD_TIMEOUT_SECS,
        }
    }

    /// Tesseract language code(s), e.g. `eng` or `eng+deu`.
    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.language = language.into();
        self
    }
}

impl Default for ImageOcrExtractor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TextExtractor for ImageOcrExtractor {
    fn kind(&self) -> FileKind {
        FileKind::Image
    }

    async fn extract(&self, data: &[u8], _password: Option<&str>) -> Result<String, ExtractionError> {
        if data.is_empty() {
            return Err(ExtractionError::Unreadable("image is empty".to_string()));
        }

        let mut tmpfile = NamedTempFile::new()
            .map_err(|e| ExtractionError::Tool(format!("failed to create temp file: {}", e)))?;
        tmpfile
            .write_all(data)
            .map_err(|e| ExtractionError::Tool(format!("failed to write temp file: {}", e)))?;

        // tesseract INPUT stdout -l LANG
        let output = run_with_timeout(
            Command::new("tesseract")
                .arg(tmpfile.path())
                .arg("stdout")
                .arg("-l")
                .arg(&self.language),
            "tesseract",
            self.timeout_secs,
        )
        .await?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ExtractionError::Unreadable(format!(
                "OCR failed: {}",
                stderr.trim()
            )));
        }

        let text = String::from_utf8_lossy(&output.stdout).trim().to_string();
        debug!(
            subsystem = "extraction",
            component = "ocr",
            language = %self.language,
            char_count = text.len(),
            "Image OCR complete"
        );
        Ok(text)
    }

    async fn health_check(&self) -> bool {
        matches!(
            Command::new("tesseract").arg("--version").output().await,
            Ok(output) if output.status.success()
        )
    }

    fn name(&self) -> &str {
        "tesseract"
    }
}
