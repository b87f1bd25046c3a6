//! OpenAI-compatible chat-completion wire types.
//!
//! The structures here are kept compatible with the OpenAI REST API so that
//! existing OpenAI SDK clients work without modification. Unknown request
//! fields (`model`, `temperature`, ...) are accepted and ignored.

use serde::{Deserialize, Serialize};
use validator::Validate;

/// Token budget used when a request omits `max_tokens`.
pub const DEFAULT_MAX_TOKENS: u64 = 256;

// ── Request ──────────────────────────────────────────────────────────────────

/// A single message in the conversation history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct Message {
    /// The role of the message author. Free-form (`"system"`, `"user"`, ...).
    pub role: String,
    /// The content of the message.
    pub content: String,
}

impl Message {
    pub fn new(role: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            content: content.into(),
        }
    }
}

/// Request body for `POST /v1/chat/completions`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct ChatCompletionRequest {
    /// Conversation history in order; rendered through the model's chat template.
    #[validate(length(min = 1, message = "messages must contain at least one message"))]
    pub messages: Vec<Message>,
    /// Maximum tokens to generate. Not capped here; the engine may cap it.
    #[serde(default = "default_max_tokens")]
    #[cfg_attr(feature = "openapi", schema(default = 256))]
    pub max_tokens: u64,
}

fn default_max_tokens() -> u64 {
    DEFAULT_MAX_TOKENS
}

impl ChatCompletionRequest {
    pub fn new(messages: Vec<Message>) -> Self {
        Self {
            messages,
            max_tokens: DEFAULT_MAX_TOKENS,
        }
    }

    pub fn with_max_tokens(mut self, max_tokens: u64) -> Self {
        self.max_tokens = max_tokens;
        self
    }
}

// ── Response ─────────────────────────────────────────────────────────────────

/// The generated assistant message inside a [`ChatChoice`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct AssistantMessage {
    /// Always `"assistant"`.
    pub role: String,
    pub content: String,
}

/// A single choice in the completion response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct ChatChoice {
    /// Zero-based index of this choice. Always `0`.
    pub index: u32,
    /// The generated message.
    pub message: AssistantMessage,
    /// Always `"stop"`: truncation by `max_tokens` is not reported.
    pub finish_reason: String,
}

/// Token accounting block of the response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct Usage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
}

/// Response body for `POST /v1/chat/completions`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct ChatCompletionResponse {
    /// Unique identifier: fixed prefix plus epoch milliseconds.
    pub id: String,
    /// Always `"chat.completion"`.
    pub object: String,
    /// Unix timestamp (seconds) of when the response was built.
    pub created: i64,
    /// Configured model identifier, echoed verbatim.
    pub model: String,
    pub choices: Vec<ChatChoice>,
    pub usage: Usage,
}
