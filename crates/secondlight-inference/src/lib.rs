//! # secondlight-inference
//!
//! Analysis Service client for Second Light.
//!
//! This crate provides:
//! - OpenAI-compatible chat completion backend (feature `openai`, default)
//! - Bounded timeout plus retry with exponential backoff on transient failures
//! - Scripted backend for deterministic tests (feature `mock`)
//!
//! # Example
//!
//! ```rust,no_run
//! use secondlight_inference::OpenAIBackend;
//! use secondlight_core::GenerationBackend;
//!
//! #[tokio::main]
//! async fn main() {
//!     let backend = OpenAIBackend::from_env().unwrap();
//!     let reply = backend.generate("Hello").await.unwrap();
//! }
//! ```

pub mod retry;

#[cfg(feature = "openai")]
pub mod openai;

#[cfg(any(test, feature = "mock"))]
pub mod mock;

// Re-export core types
pub use secondlight_core::*;

pub use retry::RetryPolicy;

#[cfg(feature = "openai")]
pub use openai::{OpenAIBackend, OpenAIConfig};
