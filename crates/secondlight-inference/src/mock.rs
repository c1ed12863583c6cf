//! Scripted generation backend for deterministic testing.
//!
//! Replies are consumed in order; once the script runs out the default
//! reply is returned. Every call is logged for assertions.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use secondlight_inference::mock::ScriptedBackend;
//!
//! let backend = ScriptedBackend::new()
//!     .then_reply(r#"{"summary": "ok", "key_findings": []}"#)
//!     .then_fail("Server error: 503");
//! ```

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;

use secondlight_core::{Error, GenerationBackend, Result};

/// One recorded call.
#[derive(Debug, Clone)]
pub struct MockCall {
    pub system: String,
    pub prompt: String,
}

#[derive(Debug, Clone)]
enum Reply {
    Text(String),
    Fail(String),
}

/// Generation backend that plays back a script of replies.
#[derive(Clone)]
pub struct ScriptedBackend {
    script: Arc<Mutex<VecDeque<Reply>>>,
    default_reply: String,
    latency: Option<Duration>,
    calls: Arc<Mutex<Vec<MockCall>>>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl ScriptedBackend {
    pub fn new() -> Self {
        Self {
            script: Arc::new(Mutex::new(VecDeque::new())),
            default_reply: String::new(),
            latency: None,
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Queue a successful reply.
    pub fn then_reply(self, text: impl Into<String>) -> Self {
        lock(&self.script).push_back(Reply::Text(text.into()));
        self
    }

    /// Queue an inference failure.
    pub fn then_fail(self, message: impl Into<String>) -> Self {
        lock(&self.script).push_back(Reply::Fail(message.into()));
        self
    }

    /// Reply used once the script is exhausted.
    pub fn with_default_reply(mut self, text: impl Into<String>) -> Self {
        self.default_reply = text.into();
        self
    }

    /// Sleep this long before answering each call.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// All calls made so far.
    pub fn calls(&self) -> Vec<MockCall> {
        lock(&self.calls).clone()
    }

    pub fn call_count(&self) -> usize {
        lock(&self.calls).len()
    }
}

impl Default for ScriptedBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl GenerationBackend for ScriptedBackend {
    async fn generate_with_system(&self, system: &str, prompt: &str) -> Result<String> {
        lock(&self.calls).push(MockCall {
            system: system.to_string(),
            prompt: prompt.to_string(),
        });

        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }

        let next = lock(&self.script).pop_front();
        match next {
            Some(Reply::Text(text)) => Ok(text),
            Some(Reply::Fail(message)) => Err(Error::Inference(message)),
            None => Ok(self.default_reply.clone()),
        }
    }

    fn model_name(&self) -> &str {
        "scripted"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_script_plays_in_order() {
        let backend = ScriptedBackend::new()
            .then_reply("first")
            .then_fail("boom")
            .with_default_reply("fallback");

        assert_eq!(backend.generate("a").await.unwrap(), "first");
        assert!(backend.generate("b").await.is_err());
        assert_eq!(backend.generate("c").await.unwrap(), "fallback");
        assert_eq!(backend.call_count(), 3);
    }

    #[tokio::test]
    async fn test_calls_record_system_prompt() {
        let backend = ScriptedBackend::new();
        backend.generate_with_system("sys", "user").await.unwrap();

        let calls = backend.calls();
        assert_eq!(calls[0].system, "sys");
        assert_eq!(calls[0].prompt, "user");
    }
}
