//! Neutral request types applications submit to the router.
//!
//! These are deliberately provider-agnostic; adapters translate them into
//! each backend's wire format. Construction of these structures (prompt
//! templating, conversation memory) is a caller concern — the router only
//! consumes them.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A single-prompt completion request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionRequest {
    #[serde(default = "Uuid::new_v4")]
    pub id: Uuid,
    pub prompt: String,
    pub system_message: Option<String>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    pub top_p: Option<f32>,
    pub frequency_penalty: Option<f32>,
    pub presence_penalty: Option<f32>,
    pub stop_sequences: Option<Vec<String>>,
    #[serde(default)]
    pub stream: bool,
    pub preferred_backend: Option<String>,
}

impl CompletionRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            prompt: prompt.into(),
            system_message: None,
            temperature: None,
            max_tokens: None,
            top_p: None,
            frequency_penalty: None,
            presence_penalty: None,
            stop_sequences: None,
            stream: false,
            preferred_backend: None,
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.prompt.is_empty() {
            return Err("prompt must be non-empty".to_string());
        }
        validate_common(
            self.temperature,
            self.top_p,
            self.frequency_penalty,
            self.presence_penalty,
        )
    }

    /// Lower this completion request to the equivalent chat request — every
    /// adapter speaks chat natively; `Complete` is always `Chat` with a
    /// single user message plus an optional system message.
    pub fn into_chat(self) -> ChatRequest {
        let mut messages = Vec::new();
        if let Some(sys) = &self.system_message {
            messages.push(ChatMessage::system(sys.clone()));
        }
        messages.push(ChatMessage::user(self.prompt));

        ChatRequest {
            id: self.id,
            messages,
            temperature: self.temperature,
            max_tokens: self.max_tokens,
            top_p: self.top_p,
            frequency_penalty: self.frequency_penalty,
            presence_penalty: self.presence_penalty,
            stop_sequences: self.stop_sequences,
            stream: self.stream,
            preferred_backend: self.preferred_backend,
        }
    }
}

/// A multi-turn chat request. Superset of [`CompletionRequest`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatRequest {
    #[serde(default = "Uuid::new_v4")]
    pub id: Uuid,
    pub messages: Vec<ChatMessage>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    pub top_p: Option<f32>,
    pub frequency_penalty: Option<f32>,
    pub presence_penalty: Option<f32>,
    pub stop_sequences: Option<Vec<String>>,
    #[serde(default)]
    pub stream: bool,
    pub preferred_backend: Option<String>,
}

impl ChatRequest {
    pub fn new(messages: Vec<ChatMessage>) -> Self {
        Self {
            id: Uuid::new_v4(),
            messages,
            temperature: None,
            max_tokens: None,
            top_p: None,
            frequency_penalty: None,
            presence_penalty: None,
            stop_sequences: None,
            stream: false,
            preferred_backend: None,
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        validate_common(
            self.temperature,
            self.top_p,
            self.frequency_penalty,
            self.presence_penalty,
        )
    }

    /// The last message with role `User`, if any — several adapters (EasyNMT)
    /// need exactly this.
    pub fn last_user_message(&self) -> Option<&ChatMessage> {
        self.messages.iter().rev().find(|m| m.role == Role::User)
    }

    pub fn system_message(&self) -> Option<&ChatMessage> {
        self.messages.iter().find(|m| m.role == Role::System)
    }

    pub fn non_system_messages(&self) -> impl Iterator<Item = &ChatMessage> {
        self.messages.iter().filter(|m| m.role != Role::System)
    }
}

fn validate_common(
    temperature: Option<f32>,
    top_p: Option<f32>,
    frequency_penalty: Option<f32>,
    presence_penalty: Option<f32>,
) -> Result<(), String> {
    if let Some(t) = temperature {
        if !(0.0..=2.0).contains(&t) {
            return Err("temperature must be between 0 and 2".to_string());
        }
    }
    if let Some(p) = top_p {
        if !(0.0..=1.0).contains(&p) {
            return Err("top_p must be between 0 and 1".to_string());
        }
    }
    if let Some(p) = frequency_penalty {
        if !(-2.0..=2.0).contains(&p) {
            return Err("frequency_penalty must be between -2 and 2".to_string());
        }
    }
    if let Some(p) = presence_penalty {
        if !(-2.0..=2.0).contains(&p) {
            return Err("presence_penalty must be between -2 and 2".to_string());
        }
    }
    Ok(())
}

/// A single chat message in the neutral model.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
    pub name: Option<String>,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self { role: Role::System, content: content.into(), name: None }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self { role: Role::User, content: content.into(), name: None }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self { role: Role::Assistant, content: content.into(), name: None }
    }
}

/// Neutral message role; adapters translate to provider-specific terms
/// (e.g. Cohere `CHATBOT`, Gemini `model`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn completion_requires_nonempty_prompt() {
        let req = CompletionRequest::new("");
        assert!(req.validate().is_err());
    }

    #[test]
    fn completion_lowers_to_chat_with_system_and_user() {
        let mut req = CompletionRequest::new("hello");
        req.system_message = Some("you are X".to_string());
        let chat = req.into_chat();
        assert_eq!(chat.messages.len(), 2);
        assert_eq!(chat.messages[0].role, Role::System);
        assert_eq!(chat.messages[1].role, Role::User);
        assert_eq!(chat.messages[1].content, "hello");
    }

    #[test]
    fn temperature_out_of_range_rejected() {
        let mut req = CompletionRequest::new("hi");
        req.temperature = Some(3.0);
        assert!(req.validate().is_err());
    }

    #[test]
    fn last_user_message_skips_trailing_assistant() {
        let req = ChatRequest::new(vec![
            ChatMessage::user("first"),
            ChatMessage::assistant("reply"),
            ChatMessage::user("second"),
        ]);
        assert_eq!(req.last_user_message().unwrap().content, "second");
    }
}
