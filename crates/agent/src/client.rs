// Model client for the chat loop
//
// Sends the conversation to an OpenAI-compatible chat completions endpoint
// and returns the raw reply. Parsing the reply is the caller's job.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use sheetchat_config::ai::ResolvedAIConfig;
use sheetchat_config::settings::AIProvider;

pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);
pub const DEFAULT_TEMPERATURE: f32 = 0.3;
pub const MAX_TOKENS: u32 = 2048;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self { role: Role::System, content: content.into() }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self { role: Role::User, content: content.into() }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self { role: Role::Assistant, content: content.into() }
    }
}

/// A model reply and the tokens it cost.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Completion {
    pub text: String,
    pub tokens: u64,
}

/// Error from a model round-trip
#[derive(Debug, Clone, PartialEq)]
pub enum AskError {
    /// Provider not configured
    NotConfigured(String),
    /// Network error
    NetworkError(String),
    /// API error response
    ApiError { status: u16, message: String },
    /// Failed to parse response
    ParseError(String),
    /// Provider returned unexpected format
    InvalidResponse(String),
}

impl std::fmt::Display for AskError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AskError::NotConfigured(msg) => write!(f, "AI not configured: {}", msg),
            AskError::NetworkError(msg) => write!(f, "Network error: {}", msg),
            AskError::ApiError { status, message } => write!(f, "API error ({}): {}", status, message),
            AskError::ParseError(msg) => write!(f, "Failed to parse response: {}", msg),
            AskError::InvalidResponse(msg) => write!(f, "Invalid response: {}", msg),
        }
    }
}

impl std::error::Error for AskError {}

/// Anything that can answer a conversation. Calls block; run them on a worker.
pub trait ChatClient: Send + Sync {
    fn complete(&self, messages: &[ChatMessage]) -> Result<Completion, AskError>;

    fn has_credential(&self) -> bool;
}

// ============================================================================
// OpenAI API types
// ============================================================================

#[derive(Serialize)]
struct OpenAIRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    temperature: f32,
    max_tokens: u32,
}

#[derive(Deserialize)]
struct OpenAIResponse {
    choices: Vec<OpenAIChoice>,
    usage: Option<OpenAIUsage>,
}

#[derive(Deserialize)]
struct OpenAIChoice {
    message: OpenAIResponseMessage,
}

#[derive(Deserialize)]
struct OpenAIResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Deserialize)]
struct OpenAIUsage {
    total_tokens: u64,
}

#[derive(Deserialize)]
struct OpenAIError {
    error: OpenAIErrorDetail,
}

#[derive(Deserialize)]
struct OpenAIErrorDetail {
    message: String,
}

// ============================================================================
// Client
// ============================================================================

#[derive(Debug, Clone)]
pub struct OpenAiClient {
    endpoint: String,
    model: String,
    temperature: f32,
    api_key: Option<String>,
}

impl OpenAiClient {
    pub fn new(endpoint: impl Into<String>, model: impl Into<String>, api_key: Option<String>) -> Self {
        Self {
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            model: model.into(),
            temperature: DEFAULT_TEMPERATURE,
            api_key,
        }
    }

    pub fn from_config(config: &ResolvedAIConfig) -> Result<Self, AskError> {
        match config.provider {
            AIProvider::None => Err(AskError::NotConfigured("AI is disabled".to_string())),
            AIProvider::OpenAI => Ok(Self {
                endpoint: config.endpoint.clone(),
                model: config.model.clone(),
                temperature: config.temperature,
                api_key: config.api_key.clone(),
            }),
        }
    }

    pub fn set_api_key(&mut self, key: String) {
        self.api_key = Some(key);
    }

    pub fn model(&self) -> &str {
        &self.model
    }
}

impl ChatClient for OpenAiClient {
    fn has_credential(&self) -> bool {
        self.api_key.as_deref().is_some_and(|k| !k.trim().is_empty())
    }

    fn complete(&self, messages: &[ChatMessage]) -> Result<Completion, AskError> {
        let Some(api_key) = self.api_key.as_deref().filter(|k| !k.trim().is_empty()) else {
            log::warn!("model request skipped: no API key");
            return Ok(Completion::default());
        };

        let client = reqwest::blocking::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| AskError::NetworkError(e.to_string()))?;

        let request = OpenAIRequest {
            model: &self.model,
            messages,
            temperature: self.temperature,
            max_tokens: MAX_TOKENS,
        };

        log::info!("model request: {} messages to {}", messages.len(), self.model);
        let response = client
            .post(format!("{}/chat/completions", self.endpoint))
            .header("Authorization", format!("Bearer {}", api_key))
            .header("Content-Type", "application/json")
            .json(&request)
            .send()
            .map_err(|e| AskError::NetworkError(e.to_string()))?;

        let status = response.status();

        if !status.is_success() {
            let error_text = response.text().unwrap_or_default();
            let message = match serde_json::from_str::<OpenAIError>(&error_text) {
                Ok(error) => error.error.message,
                Err(_) => error_text,
            };
            return Err(AskError::ApiError {
                status: status.as_u16(),
                message,
            });
        }

        let body: OpenAIResponse = response
            .json()
            .map_err(|e| AskError::ParseError(e.to_string()))?;

        let text = body
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content.unwrap_or_default())
            .ok_or_else(|| AskError::InvalidResponse("No choices in response".to_string()))?;
        let tokens = body.usage.map(|u| u.total_tokens).unwrap_or(0);
        log::info!("model reply: {} chars, {} tokens", text.len(), tokens);

        Ok(Completion { text, tokens })
    }
}

// ============================================================================
// Conversation
// ============================================================================

/// Message history sent with every request.
#[derive(Debug, Clone, Default)]
pub struct Conversation {
    messages: Vec<ChatMessage>,
}

impl Conversation {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the leading system message, or put one in front.
    pub fn set_system(&mut self, prompt: impl Into<String>) {
        let message = ChatMessage::system(prompt);
        match self.messages.first_mut() {
            Some(first) if first.role == Role::System => *first = message,
            _ => self.messages.insert(0, message),
        }
    }

    pub fn push_user(&mut self, content: impl Into<String>) {
        self.messages.push(ChatMessage::user(content));
    }

    pub fn push_assistant(&mut self, content: impl Into<String>) {
        self.messages.push(ChatMessage::assistant(content));
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn clear(&mut self) {
        self.messages.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;
    use serde_json::json;

    #[test]
    fn test_complete_returns_text_and_tokens() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(POST)
                .path("/chat/completions")
                .header("authorization", "Bearer sk-test");
            then.status(200).json_body(json!({
                "choices": [{"message": {"content": "Sorted.\n[CODE]\nreturn df\n[/CODE]"}}],
                "usage": {"total_tokens": 42}
            }));
        });

        let client = OpenAiClient::new(server.base_url(), "gpt-test", Some("sk-test".into()));
        let reply = client
            .complete(&[ChatMessage::system("sys"), ChatMessage::user("sort it")])
            .unwrap();
        mock.assert();
        assert!(reply.text.starts_with("Sorted."));
        assert_eq!(reply.tokens, 42);
    }

    #[test]
    fn test_api_error_message() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(POST).path("/chat/completions");
            then.status(401)
                .json_body(json!({"error": {"message": "bad key", "type": "auth"}}));
        });

        let client = OpenAiClient::new(server.base_url(), "gpt-test", Some("sk-x".into()));
        let err = client.complete(&[ChatMessage::user("hi")]).unwrap_err();
        assert_eq!(
            err,
            AskError::ApiError {
                status: 401,
                message: "bad key".into()
            }
        );
    }

    #[test]
    fn test_no_choices_is_invalid() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(POST).path("/chat/completions");
            then.status(200).json_body(json!({"choices": []}));
        });

        let client = OpenAiClient::new(server.base_url(), "gpt-test", Some("sk-x".into()));
        let err = client.complete(&[ChatMessage::user("hi")]).unwrap_err();
        assert!(matches!(err, AskError::InvalidResponse(_)));
    }

    #[test]
    fn test_missing_key_is_empty_completion() {
        let client = OpenAiClient::new("http://127.0.0.1:9", "gpt-test", None);
        assert!(!client.has_credential());
        assert_eq!(client.complete(&[ChatMessage::user("hi")]).unwrap(), Completion::default());
    }

    #[test]
    fn test_system_prompt_replaces_or_inserts() {
        let mut conv = Conversation::new();
        conv.push_user("hello");
        conv.set_system("one");
        assert_eq!(conv.messages()[0], ChatMessage::system("one"));
        assert_eq!(conv.len(), 2);

        conv.set_system("two");
        assert_eq!(conv.messages()[0], ChatMessage::system("two"));
        assert_eq!(conv.len(), 2);

        conv.clear();
        assert!(conv.is_empty());
    }

    #[test]
    fn test_roles_serialize_lowercase() {
        let json = serde_json::to_string(&ChatMessage::assistant("ok")).unwrap();
        assert_eq!(json, r#"{"role":"assistant","content":"ok"}"#);
    }
}
