//! OpenAI-compatible Analysis Service backend.
//!
//! Works with any endpoint that speaks the chat completions API (OpenAI,
//! Azure OpenAI, vLLM, Ollama in compatibility mode).
//!
//! # Example
//!
//! ```rust,no_run
//! use secondlight_inference::openai::{OpenAIBackend, OpenAIConfig};
//! use secondlight_core::GenerationBackend;
//!
//! #[tokio::main]
//! async fn main() {
//!     // From environment variables
//!     let backend = OpenAIBackend::from_env().unwrap();
//!
//!     // Or with custom config
//!     let config = OpenAIConfig {
//!         base_url: "http://localhost:8000/v1".to_string(),
//!         gen_model: "llama3".to_string(),
//!         ..Default::default()
//!     };
//!     let backend = OpenAIBackend::new(config).unwrap();
//!
//!     let text = backend
//!         .generate_with_system("Reply in JSON.", "Hemoglobin 13.5 g/dL")
//!         .await
//!         .unwrap();
//! }
//! ```

mod backend;
mod error;
mod types;

pub use backend::{OpenAIBackend, OpenAIConfig, DEFAULT_OPENAI_URL};
pub use error::{to_core_error, OpenAIErrorCode};
pub use types::*;
