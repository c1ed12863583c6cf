//! PDF text-layer extraction with `pdftotext` (poppler-utils).

use std::io::Write;

use async_trait::async_trait;
use tempfile::NamedTempFile;
use tokio::process::Command;
use tracing::{debug, warn};

use secondlight_core::defaults::EXTRACTION_CMD_TIMEOUT_SECS;

use super::{run_with_timeout, ExtractionError, FileKind, TextExtractor};

/// Extracts the text layer of a PDF, page by page.
///
/// Encrypted PDFs are opened with the user password when one is given.
/// A missing password and a wrong one are reported as distinct errors.
pub struct PdfTextExtractor {
    timeout_secs: u64,
}

impl PdfTextExtractor {
    pub fn new() -> Self {
        Self {
            timeout_secs: EXTRACTION_CMD_TIMEOUT_SECS,
        }
    }

    pub fn with_timeout(mut self, timeout_secs: u64) -> Self {
        self.timeout_secs = timeout_secs;
        self
    }
}

impl Default for PdfTextExtractor {
    fn default() -> Self {
        Self::new()
    }
}

/// Normalize `pdftotext` output: whitespace inside a page collapses to
/// single spaces, pages are joined with a blank line, empty pages drop out.
pub fn join_pdf_pages(raw: &str) -> String {
    raw.split('\u{c}')
        .map(|page| page.split_whitespace().collect::<Vec<_>>().join(" "))
        .filter(|page| !page.is_empty())
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Map a failed `pdftotext` run to an extraction error.
pub(crate) fn classify_failure(stderr: &str, password_given: bool) -> ExtractionError {
    let lower = stderr.to_ascii_lowercase();
    if lower.contains("incorrect password") || lower.contains("encrypted") {
        if password_given {
            ExtractionError::IncorrectPassword
        } else {
            ExtractionError::PasswordRequired
        }
    } else {
        let detail = stderr.trim();
        ExtractionError::Unreadable(if detail.is_empty() {
            "pdftotext failed".to_string()
        } else {
            detail.to_string()
        })
    }
}

#[async_trait]
impl TextExtractor for PdfTextExtractor {
    fn kind(&self) -> FileKind {
        FileKind::Pdf
    }

    async fn extract(&self, data: &[u8], password: Option<&str>) -> Result<String, ExtractionError> {
        if data.len() < 4 || &data[0..4] != b"%PDF" {
            return Err(ExtractionError::Unreadable(
                "not a valid PDF (missing %PDF header)".to_string(),
            ));
        }

        // pdftotext reads from a file path
        let mut tmpfile = NamedTempFile::new()
            .map_err(|e| ExtractionError::Tool(format!("failed to create temp file: {}", e)))?;
        tmpfile
            .write_all(data)
            .map_err(|e| ExtractionError::Tool(format!("failed to write temp file: {}", e)))?;

        let password = password.filter(|p| !p.is_empty());
        let mut cmd = Command::new("pdftotext");
        cmd.arg("-enc").arg("UTF-8");
        if let Some(pw) = password {
            cmd.arg("-upw").arg(pw);
        }
        cmd.arg(tmpfile.path()).arg("-");

        let output = run_with_timeout(&mut cmd, "pdftotext", self.timeout_secs).await?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let err = classify_failure(&stderr, password.is_some());
            warn!(
                subsystem = "extraction",
                component = "pdf",
                code = err.code(),
                "pdftotext failed"
            );
            return Err(err);
        }

        let text = join_pdf_pages(&String::from_utf8_lossy(&output.stdout));
        debug!(
            subsystem = "extraction",
            component = "pdf",
            char_count = text.len(),
            "PDF text extracted"
        );
        Ok(text)
    }

    async fn health_check(&self) -> bool {
        match Command::new("pdftotext").arg("-v").output().await {
            // pdftotext -v exits with 0 or 99 depending on the version
            Ok(output) => output.status.success() || output.status.code() == Some(99),
            Err(_) => false,
        }
    }

    fn name(&self) -> &str {
        "pdftotext"
    }
}
