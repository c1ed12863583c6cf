//! Centralized default constants for Second Light.
//!
//! **This module is the single source of truth** for shared default values.
//! Crates reference these constants instead of defining their own magic
//! numbers.

// =============================================================================
// ANALYSIS PIPELINE
// =============================================================================

/// Extracted text must be longer than this many characters (after trimming)
/// before it is sent to the Analysis Service.
pub const MIN_TEXT_CHARS: usize = 20;

/// Placeholder stored when the model omits a finding's value.
pub const NOT_SPECIFIED: &str = "Not specified";

/// Whether a model refusal on text containing lab-report keywords is reported
/// as a misclassification instead of a plain rejection.
pub const LAB_KEYWORD_OVERRIDE: bool = true;

// =============================================================================
// ANALYSIS SERVICE
// =============================================================================

/// Default generation model.
pub const GEN_MODEL: &str = "gpt-4o";

/// Upper bound for a single chat completion, in seconds.
pub const ANALYSIS_TIMEOUT_SECS: u64 = 60;

/// Retries after the first attempt on timeout, 429 and 5xx.
pub const ANALYSIS_MAX_RETRIES: u32 = 2;

/// Base delay for exponential backoff between retries.
pub const ANALYSIS_RETRY_BASE_MS: u64 = 500;

/// Sampling temperature for extraction prompts.
pub const ANALYSIS_TEMPERATURE: f32 = 0.1;

// =============================================================================
// CLIENT POLLER
// =============================================================================

/// Fixed interval between document status fetches.
pub const POLL_INTERVAL_SECS: u64 = 5;

// =============================================================================
// SUBSCRIPTION
// =============================================================================

/// Documents a subscriber may analyze per billing cycle.
pub const MONTHLY_REPORT_ALLOWANCE: i64 = 30;

// =============================================================================
// STORAGE
// =============================================================================

/// Lifetime of signed file URLs.
pub const SIGNED_URL_TTL_SECS: u64 = 3600;

/// Maximum accepted upload body (25 MiB).
pub const MAX_UPLOAD_BYTES: usize = 25 * 1024 * 1024;

// =============================================================================
// EXTRACTION
// =============================================================================

/// Timeout for external extraction tools (pdftotext, tesseract).
pub const EXTRACTION_CMD_TIMEOUT_SECS: u64 = 120;

/// OCR language passed to tesseract.
pub const OCR_LANGUAGE: &str = "eng";

// =============================================================================
// DATABASE
// =============================================================================

/// Maximum number of pooled connections.
pub const DB_MAX_CONNECTIONS: u32 = 10;

/// Pool acquire timeout, in seconds.
pub const DB_CONNECT_TIMEOUT_SECS: u64 = 30;

/// Idle connection timeout, in seconds.
pub const DB_IDLE_TIMEOUT_SECS: u64 = 600;
