//! Wire types for the `/chat/completions` endpoint.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    /// Roles this client never sends (`tool`, `developer`, ...).
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    /// Null when the model produced no text, e.g. when cut off immediately.
    #[serde(default)]
    pub content: Option<String>,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: Some(content.into()),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: Some(content.into()),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ChatCompletionRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
}

#[derive(Debug, Deserialize)]
pub struct ChatCompletionResponse {
    #[serde(default)]
    pub choices: Vec<ChatChoice>,
    #[serde(default)]
    pub usage: Option<ChatUsage>,
}

#[derive(Debug, Deserialize)]
pub struct ChatChoice {
    pub message: ChatMessage,
    #[serde(default)]
    pub finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ChatUsage {
    #[serde(default)]
    pub total_tokens: u32,
}

/// The first choice of a completion, flattened for the caller.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct Completion {
    pub text: String,
    /// The model stopped at the token limit, so JSON output is likely cut short.
    pub truncated: bool,
    pub total_tokens: Option<u32>,
}

impl ChatCompletionResponse {
    pub fn into_completion(self) -> Completion {
        let total_tokens = self.usage.map(|u| u.total_tokens);
        match self.choices.into_iter().next() {
            Some(choice) => Completion {
                text: choice.message.content.unwrap_or_default(),
                truncated: choice.finish_reason.as_deref() == Some("length"),
                total_tokens,
            },
            None => Completion {
                total_tokens,
                ..Completion::default()
            },
        }
    }
}

/// Error envelope returned with non-2xx statuses.
#[derive(Debug, Deserialize)]
pub struct OpenAIErrorResponse {
    pub error: OpenAIError,
}

#[derive(Debug, Deserialize)]
pub struct OpenAIError {
    pub message: String,
    #[serde(rename = "type", default)]
    pub error_type: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_omits_unset_options() {
        let request = ChatCompletionRequest {
            model: "gpt-4o".to_string(),
            messages: vec![
                ChatMessage::system("You are a medical assistant."),
                ChatMessage::user("Hemoglobin 13.5 g/dL"),
            ],
            temperature: Some(0.1),
            max_tokens: None,
        };

        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["messages"][0]["role"], "system");
        assert_eq!(json["messages"][1]["role"], "user");
        assert!(json.get("max_tokens").is_none());
        assert!(json["temperature"].as_f64().unwrap() > 0.09);
    }

    #[test]
    fn test_completion_from_first_choice() {
        let json = r#"{
            "id": "chatcmpl-1",
            "choices": [
                {"index": 0, "message": {"role": "assistant", "content": "{\"summary\":\"ok\"}"}, "finish_reason": "stop"},
                {"index": 1, "message": {"role": "assistant", "content": "ignored"}, "finish_reason": "stop"}
            ],
            "usage": {"prompt_tokens": 10, "completion_tokens": 5, "total_tokens": 15}
        }"#;
        let completion = serde_json::from_str::<ChatCompletionResponse>(json)
            .unwrap()
            .into_completion();
        assert_eq!(completion.text, r#"{"summary":"ok"}"#);
        assert!(!completion.truncated);
        assert_eq!(completion.total_tokens, Some(15));
    }

    #[test]
    fn test_truncated_null_content() {
        let json = r#"{
            "choices": [{"message": {"role": "assistant", "content": null}, "finish_reason": "length"}]
        }"#;
        let completion = serde_json::from_str::<ChatCompletionResponse>(json)
            .unwrap()
            .into_completion();
        assert_eq!(completion.text, "");
        assert!(completion.truncated);
        assert_eq!(completion.total_tokens, None);
    }

    #[test]
    fn test_no_choices_is_empty_completion() {
        let completion = serde_json::from_str::<ChatCompletionResponse>(r#"{"choices": []}"#)
            .unwrap()
            .into_completion();
        assert_eq!(completion, Completion::default());
    }

    #[test]
    fn test_unknown_role_tolerated() {
        let msg: ChatMessage = serde_json::from_str(r#"{"role": "tool", "content": "x"}"#).unwrap();
        assert_eq!(msg.role, Role::Other);
    }

    #[test]
    fn test_error_response_without_type() {
        let json = r#"{"error": {"message": "overloaded"}}"#;
        let response: OpenAIErrorResponse = serde_json::from_str(json).unwrap();
        assert_eq!(response.error.message, "overloaded");
        assert_eq!(response.error.error_type, "");
    }
}
