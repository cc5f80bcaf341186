//! Language model capability.
//!
//! One interface, two interchangeable providers: an on-device model exposed
//! by the browser and a hosted chat-completions API. The engine only ever
//! talks to `LanguageModel` / `ModelSession`; which provider answers is
//! decided by the `ModelBackend` handed to `create_session`.

use std::future::Future;

use futures::stream::LocalBoxStream;
use serde::{Deserialize, Serialize};
use smol_str::SmolStr;

use crate::error::LookupError;

/// Author of one chat message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// One message of a conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// Options for a new session.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,
    /// Few-shot examples seeded into the conversation.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub initial_prompts: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_k: Option<u32>,
}

impl SessionOptions {
    /// Full conversation prefix: the system prompt followed by the examples.
    pub fn seed_messages(&self) -> Vec<ChatMessage> {
        let mut messages = Vec::with_capacity(self.initial_prompts.len() + 1);
        if let Some(system) = &self.system_prompt {
            messages.push(ChatMessage::system(system.clone()));
        }
        messages.extend(self.initial_prompts.iter().cloned());
        messages
    }
}

/// Which provider a session should come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModelBackend {
    /// The browser's built-in model.
    OnDevice,
    /// A hosted chat-completions model.
    Hosted { model: SmolStr, api_key: String },
}

impl ModelBackend {
    pub fn is_on_device(&self) -> bool {
        matches!(self, ModelBackend::OnDevice)
    }
}

/// Stream of cumulative model output. Each item is the full text so far.
pub type TextStream = LocalBoxStream<'static, Result<String, LookupError>>;

/// A conversation with a model.
pub trait ModelSession: 'static {
    /// Send one prompt and wait for the complete answer.
    fn prompt_once(&self, input: &str) -> impl Future<Output = Result<String, LookupError>>;

    /// Send one prompt and stream the answer.
    ///
    /// The stream is finite and not restartable. Dropping it abandons the
    /// request; nothing else needs to be called.
    fn prompt_streaming(&self, input: &str) -> TextStream;

    /// Release provider resources held by the session.
    fn destroy(&self);
}

/// Factory for model sessions.
pub trait LanguageModel: Clone + 'static {
    type Session: ModelSession;

    fn create_session(
        &self,
        backend: &ModelBackend,
        options: SessionOptions,
    ) -> impl Future<Output = Result<Self::Session, LookupError>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seed_messages_order() {
        let options = SessionOptions {
            system_prompt: Some("be brief".into()),
            initial_prompts: vec![ChatMessage::user("Q"), ChatMessage::assistant("A")],
            ..Default::default()
        };
        let roles: Vec<_> = options.seed_messages().iter().map(|m| m.role).collect();
        assert_eq!(roles, [Role::System, Role::User, Role::Assistant]);
    }

    #[test]
    fn test_session_options_wire_names() {
        let options = SessionOptions {
            top_k: Some(1),
            temperature: Some(1.0),
            ..Default::default()
        };
        let json = serde_json::to_value(&options).unwrap();
        assert_eq!(json, serde_json::json!({ "temperature": 1.0, "topK": 1 }));
    }
}
