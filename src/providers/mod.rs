// File: src/providers/mod.rs
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::core::error::CompletionError;

pub mod http;
pub mod llm;
pub mod retry;
pub mod transcript;

pub use http::HttpCompletionService;
pub use llm::Llm;
pub use retry::{RetryPolicy, RetryingCompletionService};

/// Roles supported for chat messages
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

/// Chat message (role + text)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
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
}

/// One request to the completion endpoint
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CompletionRequest {
    pub endpoint: String,
    pub model: String,
    pub messages: Vec<Message>,
    pub temperature: f32,
    pub max_tokens: usize,
    /// Always false; the engine only consumes whole responses
    #[serde(default)]
    pub stream: bool,
}

impl CompletionRequest {
    /// Concatenated system messages
    pub fn system_text(&self) -> String {
        self.text_for(Role::System)
    }

    /// Concatenated user messages
    pub fn user_text(&self) -> String {
        self.text_for(Role::User)
    }

    fn text_for(&self, role: Role) -> String {
        self.messages
            .iter()
            .filter(|m| m.role == role)
            .map(|m| m.content.as_str())
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Stateless request/response text completion
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CompletionService: Send + Sync {
    async fn complete(&self, req: &CompletionRequest) -> Result<String, CompletionError>;
}
