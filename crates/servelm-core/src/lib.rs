//! # servelm-core
//!
//! Request/response contract and accounting around a text-generation engine:
//! validate a conversation, render it into a prompt, generate, count tokens,
//! build an OpenAI-compatible response and optionally append an audit line.
//!
//! The engine itself is abstracted behind [`GenerationEngine`]; the
//! [`Orchestrator`] owns it on a single worker thread so generations never
//! overlap.

pub mod audit;
pub mod engine;
pub mod error;
pub mod orchestrator;
pub mod response;
pub mod types;
pub mod usage;

#[cfg(any(test, feature = "test-util"))]
pub mod testing;

pub use audit::{AuditLine, AuditLogger, AuditSink};
pub use engine::{EngineError, GenerationEngine, TemplateOptions, TemplateOutput, TokenId};
pub use error::{AuditError, CompletionError};
pub use orchestrator::{Completion, CompletionPipeline, Orchestrator};
pub use response::{REQUEST_ID_PREFIX, ResponseBuilder};
pub use types::{
    AssistantMessage, ChatChoice, ChatCompletionRequest, ChatCompletionResponse, DEFAULT_MAX_TOKENS,
    Message, Usage,
};
pub use usage::UsageRecord;
