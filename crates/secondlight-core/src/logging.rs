//! Structured logging schema and field name constants for Second Light.
//!
//! All crates use these constants for consistent structured logging fields,
//! so log aggregation can query by the same names across subsystems.
//!
//! ## Log Level Contract
//!
//! | Level | Usage |
//! |-------|-------|
//! | ERROR | Degraded service, requires operator attention |
//! | WARN  | Recoverable issue, automatic fallback applied |
//! | INFO  | Lifecycle events (startup, shutdown), analysis completions |
//! | DEBUG | Decision points, intermediate values, config choices |
//! | TRACE | Per-item iteration (findings, poll ticks) |

/// `RUST_LOG` fallback for the API server binary.
pub const DEFAULT_FILTER: &str =
    "secondlight_api=debug,secondlight_analysis=debug,secondlight_db=info,secondlight_inference=info,tower_http=debug";

// ─── Identity fields ───────────────────────────────────────────────────────

/// Correlation ID propagated from the HTTP request.
pub const REQUEST_ID: &str = "request_id";

/// Subsystem originating the log event.
/// Values: "api", "db", "inference", "analysis", "extraction", "storage"
pub const SUBSYSTEM: &str = "subsystem";

/// Component within a subsystem.
/// Examples: "requestor", "poller", "openai", "pool"
pub const COMPONENT: &str = "component";

/// Logical operation name.
/// Examples: "analyze", "fallback_findings", "persist", "poll"
pub const OPERATION: &str = "op";

// ─── Entity fields ─────────────────────────────────────────────────────────

/// Document UUID being operated on.
pub const DOCUMENT_ID: &str = "document_id";

/// Owning user UUID.
pub const USER_ID: &str = "user_id";

/// Processing log row UUID.
pub const LOG_ID: &str = "log_id";

// ─── Measurement fields ────────────────────────────────────────────────────

/// Wall-clock duration in milliseconds.
pub const DURATION_MS: &str = "duration_ms";

/// Number of key findings extracted.
pub const FINDING_COUNT: &str = "finding_count";

/// Number of recommendations extracted.
pub const RECOMMENDATION_COUNT: &str = "recommendation_count";

/// Byte length of a prompt.
pub const PROMPT_LEN: &str = "prompt_len";

/// Byte length of a model response.
pub const RESPONSE_LEN: &str = "response_len";

/// Attempt number for retried calls (1-based).
pub const ATTEMPT: &str = "attempt";

// ─── Inference fields ──────────────────────────────────────────────────────

/// Model name used for inference.
pub const MODEL: &str = "model";

// ─── Outcome fields ────────────────────────────────────────────────────────

/// Document state after the operation.
pub const STATE: &str = "state";

/// Error message when an operation fails.
pub const ERROR_MSG: &str = "error";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_filter_covers_workspace_crates() {
        for target in [
            "secondlight_api=",
            "secondlight_analysis=",
            "secondlight_db=",
            "secondlight_inference=",
        ] {
            assert!(DEFAULT_FILTER.contains(target), "missing {}", target);
        }
    }

    #[test]
    fn test_field_names_are_snake_case() {
        for name in [
            REQUEST_ID,
            SUBSYSTEM,
            COMPONENT,
            DOCUMENT_ID,
            USER_ID,
            LOG_ID,
            DURATION_MS,
            FINDING_COUNT,
            RECOMMENDATION_COUNT,
            PROMPT_LEN,
            RESPONSE_LEN,
            ATTEMPT,
            MODEL,
            STATE,
        ] {
            assert!(
                name.chars().all(|c| c.is_ascii_lowercase() || c == '_'),
                "{} is not snake_case",
                name
            );
        }
    }
}
