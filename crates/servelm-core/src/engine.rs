//! Boundary to the text-generation capability.
//!
//! A [`GenerationEngine`] owns a loaded model and its tokenizer. The core
//! never calls it concurrently: every call is made from the single worker
//! thread started by [`crate::Orchestrator`], so implementations do not need
//! to be `Sync`.

use thiserror::Error;

use crate::types::Message;

/// Token id as produced by the engine's tokenizer.
pub type TokenId = u32;

/// Errors surfaced by a [`GenerationEngine`] implementation.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Rendering the chat template failed.
    #[error("chat template failed: {0}")]
    Template(String),

    /// Encoding or decoding through the tokenizer failed.
    #[error("tokenizer failed: {0}")]
    Tokenizer(String),

    /// The generation call failed (resource exhaustion, internal fault, ...).
    #[error("generation failed: {0}")]
    Generation(String),
}

/// Flags forwarded to [`GenerationEngine::apply_template`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TemplateOptions {
    /// Return token ids instead of rendered text.
    pub tokenize: bool,
    /// Append the assistant-turn header so the model answers next.
    pub add_generation_prompt: bool,
}

impl Default for TemplateOptions {
    fn default() -> Self {
        Self {
            tokenize: true,
            add_generation_prompt: true,
        }
    }
}

/// Whatever the templating capability produced.
///
/// Only [`TemplateOutput::Tokens`] holding non-negative ids is usable as a
/// prompt; every other shape is a contract violation by the engine.
#[derive(Debug, Clone, PartialEq)]
pub enum TemplateOutput {
    /// Token ids. Signed so that a misbehaving engine can be detected.
    Tokens(Vec<i64>),
    /// Rendered prompt text (what a template returns with `tokenize: false`).
    Text(String),
    /// Structured output, e.g. an encoding object from a template variant.
    Structured(serde_json::Value),
}

impl TemplateOutput {
    /// Short name of the shape, used in error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            TemplateOutput::Tokens(_) => "tokens",
            TemplateOutput::Text(_) => "text",
            TemplateOutput::Structured(_) => "structured",
        }
    }
}

/// Capability the completion pipeline needs from a loaded model.
pub trait GenerationEngine: Send + 'static {
    /// Apply the model's chat template to `messages`.
    fn apply_template(
        &self,
        messages: &[Message],
        options: TemplateOptions,
    ) -> Result<TemplateOutput, EngineError>;

    /// Encode text into token ids without adding special tokens.
    fn encode(&self, text: &str) -> Result<Vec<TokenId>, EngineError>;

    /// Decode token ids back into text, keeping special tokens.
    fn decode(&self, tokens: &[TokenId]) -> Result<String, EngineError>;

    /// Generate a completion for `prompt`, producing at most `max_tokens` tokens.
    ///
    /// Blocks until generation finishes; there is no timeout or cancellation.
    fn generate(&mut self, prompt: &str, max_tokens: u64) -> Result<String, EngineError>;
}

impl<E: GenerationEngine + ?Sized> GenerationEngine for Box<E> {
    fn apply_template(
        &self,
        messages: &[Message],
        options: TemplateOptions,
    ) -> Result<TemplateOutput, EngineError> {
        (**self).apply_template(messages, options)
    }

    fn encode(&self, text: &str) -> Result<Vec<TokenId>, EngineError> {
        (**self).encode(text)
    }

    fn decode(&self, tokens: &[TokenId]) -> Result<String, EngineError> {
        (**self).decode(tokens)
    }

    fn generate(&mut self, prompt: &str, max_tokens: u64) -> Result<String, EngineError> {
        (**self).generate(prompt, max_tokens)
    }
}
