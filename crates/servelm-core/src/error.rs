use std::path::PathBuf;

use thiserror::Error;

use crate::engine::EngineError;

/// Failures of a single chat-completion request once it has passed validation.
#[derive(Debug, Error)]
pub enum CompletionError {
    /// The template produced something other than a sequence of token ids.
    #[error("unexpected prompt format: {0}")]
    Template(String),

    /// The template produced no tokens at all.
    #[error("chat template produced an empty prompt")]
    EmptyPrompt,

    /// The engine failed while templating, tokenizing or generating.
    #[error("generation failed: {0}")]
    Generation(#[from] EngineError),

    /// The engine worker thread is gone (panicked or shut down).
    #[error("generation worker is unavailable")]
    WorkerUnavailable,
}

impl CompletionError {
    /// `true` when the failure is attributable to the caller's input.
    pub fn is_client_error(&self) -> bool {
        matches!(self, CompletionError::EmptyPrompt)
    }
}

/// Failures of the audit sink. Never propagated to HTTP callers.
#[derive(Debug, Error)]
pub enum AuditError {
    #[error("failed to open audit log {path}")]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to serialize audit line")]
    Serialize(#[from] serde_json::Error),

    #[error("failed to write audit line")]
    Io(#[from] std::io::Error),

    #[error("audit sink lock poisoned")]
    LockPoisoned,
}
