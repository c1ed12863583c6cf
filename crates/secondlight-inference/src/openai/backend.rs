//! OpenAI-compatible Analysis Service backend.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::Client;
use tracing::{debug, info, warn};

use secondlight_core::defaults::{ANALYSIS_TEMPERATURE, ANALYSIS_TIMEOUT_SECS, GEN_MODEL};
use secondlight_core::{Error, GenerationBackend, Result};

use super::error::{to_core_error, OpenAIErrorCode};
use super::types::*;
use crate::retry::RetryPolicy;

/// Default OpenAI API endpoint.
pub const DEFAULT_OPENAI_URL: &str = "https://api.openai.com/v1";

/// Configuration for OpenAI-compatible backend.
#[derive(Debug, Clone)]
pub struct OpenAIConfig {
    /// Base URL for the API endpoint.
    pub base_url: String,
    /// API key for authentication (optional for local endpoints).
    pub api_key: Option<String>,
    /// Model to use for generation.
    pub gen_model: String,
    /// Sampling temperature; `None` leaves the server default.
    pub temperature: Option<f32>,
    /// Per-attempt request timeout in seconds.
    pub timeout_seconds: u64,
    /// Retry policy for transient failures.
    pub retry: RetryPolicy,
}

impl Default for OpenAIConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_OPENAI_URL.to_string(),
            api_key: None,
            gen_model: GEN_MODEL.to_string(),
            temperature: Some(ANALYSIS_TEMPERATURE),
            timeout_seconds: ANALYSIS_TIMEOUT_SECS,
            retry: RetryPolicy::default(),
        }
    }
}

impl OpenAIConfig {
    /// Load from environment, falling back to defaults for unset or
    /// unparsable values.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            base_url: std::env::var("OPENAI_BASE_URL").unwrap_or(defaults.base_url),
            api_key: std::env::var("OPENAI_API_KEY")
                .ok()
                .filter(|k| !k.is_empty()),
            gen_model: std::env::var("OPENAI_GEN_MODEL").unwrap_or(defaults.gen_model),
            temperature: defaults.temperature,
            timeout_seconds: std::env::var("OPENAI_TIMEOUT")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.timeout_seconds),
            retry: RetryPolicy {
                max_retries: std::env::var("OPENAI_MAX_RETRIES")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(defaults.retry.max_retries),
                base_delay: std::env::var("OPENAI_RETRY_BASE_MS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .map(Duration::from_millis)
                    .unwrap_or(defaults.retry.base_delay),
            },
        }
    }
}

/// A failed attempt, classified for the retry loop.
struct AttemptFailure {
    code: OpenAIErrorCode,
    message: String,
}

/// OpenAI-compatible chat completion backend.
pub struct OpenAIBackend {
    client: Client,
    config: OpenAIConfig,
}

impl OpenAIBackend {
    /// Create a new OpenAI backend with the given configuration.
    pub fn new(config: OpenAIConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()
            .map_err(|e| Error::Inference(format!("Failed to create HTTP client: {}", e)))?;

        info!(
            subsystem = "inference",
            base_url = %config.base_url,
            model = %config.gen_model,
            timeout_secs = config.timeout_seconds,
            max_retries = config.retry.max_retries,
            "Initializing OpenAI backend"
        );

        Ok(Self { client, config })
    }

    /// Create with default configuration.
    pub fn with_defaults() -> Result<Self> {
        Self::new(OpenAIConfig::default())
    }

    /// Create from environment variables.
    pub fn from_env() -> Result<Self> {
        Self::new(OpenAIConfig::from_env())
    }

    /// Get the current configuration.
    pub fn config(&self) -> &OpenAIConfig {
        &self.config
    }

    /// Build a request with authentication if configured.
    fn build_request(&self, endpoint: &str) -> reqwest::RequestBuilder {
        let url = format!("{}{}", self.config.base_url.trim_end_matches('/'), endpoint);
        let mut req = self.client.post(&url);

        if let Some(ref api_key) = self.config.api_key {
            req = req.header("Authorization", format!("Bearer {}", api_key));
        }

        req.header("Content-Type", "application/json")
    }

    async fn attempt(
        &self,
        request: &ChatCompletionRequest,
    ) -> std::result::Result<Completion, AttemptFailure> {
        let response = self
            .build_request("/chat/completions")
            .json(request)
            .send()
            .await
            .map_err(|e| AttemptFailure {
                code: OpenAIErrorCode::from_transport(&e),
                message: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            let body: Option<OpenAIErrorResponse> = response.json().await.ok();
            let (error_type, message) = match body {
                Some(b) => (b.error.error_type, b.error.message),
                None => (String::new(), "Unknown error".to_string()),
            };
            return Err(AttemptFailure {
                code: OpenAIErrorCode::from_response(status.as_u16(), &error_type),
                message: format!("OpenAI returned {}: {}", status, message),
            });
        }

        let result: ChatCompletionResponse = response.json().await.map_err(|e| AttemptFailure {
            code: OpenAIErrorCode::from_transport(&e),
            message: format!("Failed to parse response: {}", e),
        })?;

        Ok(result.into_completion())
    }
}

#[async_trait]
impl GenerationBackend for OpenAIBackend {
    async fn generate_with_system(&self, system: &str, prompt: &str) -> Result<String> {
        let mut messages = Vec::with_capacity(2);
        if !system.is_empty() {
            messages.push(ChatMessage::system(system));
        }
        messages.push(ChatMessage::user(prompt));

        let request = ChatCompletionRequest {
            model: self.config.gen_model.clone(),
            messages,
            temperature: self.config.temperature,
            max_tokens: None,
        };

        let policy = self.config.retry;
        let start = Instant::now();
        let mut retry = 0u32;

        loop {
            debug!(
                subsystem = "inference",
                op = "generate",
                model = %self.config.gen_model,
                prompt_len = prompt.len(),
                attempt = retry + 1,
                "Calling chat completions"
            );

            match self.attempt(&request).await {
                Ok(completion) => {
                    if completion.truncated {
                        warn!(
                            subsystem = "inference",
                            op = "generate",
                            model = %self.config.gen_model,
                            response_len = completion.text.len(),
                            "Completion hit the token limit; output may be incomplete"
                        );
                    }
                    debug!(
                        subsystem = "inference",
                        op = "generate",
                        response_len = completion.text.len(),
                        total_tokens = completion.total_tokens,
                        duration_ms = start.elapsed().as_millis() as u64,
                        "Generation complete"
                    );
                    return Ok(completion.text);
                }
                Err(failure) if failure.code.is_retryable() && retry < policy.max_retries => {
                    let delay = policy.backoff(retry);
                    warn!(
                        subsystem = "inference",
                        op = "generate",
                        attempt = retry + 1,
                        delay_ms = delay.as_millis() as u64,
                        error = %failure.message,
                        "Transient Analysis Service failure, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    retry += 1;
                }
                Err(failure) => {
                    warn!(
                        subsystem = "inference",
                        op = "generate",
                        attempt = retry + 1,
                        error = %failure.message,
                        "Analysis Service call failed"
                    );
                    return Err(to_core_error(failure.code, &failure.message));
                }
            }
        }
    }

    fn model_name(&self) -> &str {
        &self.config.gen_model
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = OpenAIConfig::default();
        assert_eq!(config.base_url, DEFAULT_OPENAI_URL);
        assert_eq!(config.gen_model, "gpt-4o");
        assert_eq!(config.timeout_seconds, 60);
        assert_eq!(config.retry, RetryPolicy::default());
        assert!(config.api_key.is_none());
    }

    #[test]
    fn test_backend_creation() {
        let backend = OpenAIBackend::with_defaults().unwrap();
        assert_eq!(backend.config().base_url, DEFAULT_OPENAI_URL);
        assert_eq!(backend.model_name(), "gpt-4o");
    }

    #[test]
    fn test_model_name_accessor() {
        let config = OpenAIConfig {
            gen_model: "test-gen".to_string(),
            ..Default::default()
        };
        let backend = OpenAIBackend::new(config).unwrap();
        assert_eq!(GenerationBackend::model_name(&backend), "test-gen");
    }
}
