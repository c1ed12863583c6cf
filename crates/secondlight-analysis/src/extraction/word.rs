//! Word (.docx) extraction with `pandoc`.

use std::io::Write;

use async_trait::async_trait;
use tempfile::Builder;
use tokio::process::Command;

use secondlight_core::defaults::EXTRACTION_CMD_TIMEOUT_SECS;

use super::{run_with_timeout, ExtractionError, FileKind, TextExtractor};

/// Converts a .docx file to plain text.
pub struct WordExtractor {
    timeout_secs: u64,
}

impl WordExtractor {
    pub fn new() -> Self {
        Self {
            timeout_secs: EXTRACTION_CMD_TIMEOUT_SECS,
        }
    }
}

impl Default for WordExtractor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TextExtractor for WordExtractor {
    fn kind(&self) -> FileKind {
        FileKind::Word
    }

    async fn extract(&self, data: &[u8], _password: Option<&str>) -> Result<String, ExtractionError> {
        if data.is_empty() {
            return Err(ExtractionError::Unreadable("document is empty".to_string()));
        }

        let mut tmpfile = Builder::new()
            .suffix(".docx")
            .tempfile()
            .map_err(|e| ExtractionError::Tool(format!("failed to create temp file: {}", e)))?;
        tmpfile
            .write_all(data)
            .map_err(|e| ExtractionError::Tool(format!("failed to write temp file: {}", e)))?;

        let output = run_with_timeout(
            Command::new("pandoc")
                .arg("-f")
                .arg("docx")
                .arg("-t")
                .arg("plain")
                .arg("--wrap=none")
                .arg(tmpfile.path()),
            "pandoc",
            self.timeout_secs,
        )
        .await?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ExtractionError::Unreadable(stderr.trim().to_string()));
        }

        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    async fn health_check(&self) -> bool {
        matches!(
            Command::new("pandoc").arg("--version").output().await,
            Ok(output) if output.status.success()
        )
    }

    fn name(&self) -> &str {
        "pandoc"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_empty_document_is_unreadable() {
        let err = WordExtractor::new().extract(b"", None).await.unwrap_err();
        assert!(matches!(err, ExtractionError::Unreadable(_)));
    }

    #[test]
    fn test_name_and_kind() {
        assert_eq!(WordExtractor::new().name(), "pandoc");
        assert_eq!(WordExtractor::new().kind(), FileKind::Word);
    }
}
