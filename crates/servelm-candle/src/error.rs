use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CandleEngineError {
    #[error("no .gguf weights found in {location}")]
    NoWeights { location: String },

    #[error("weights file {file} not found in {location}")]
    WeightsNotFound { file: String, location: String },

    #[error("tokenizer.json not found in {location}")]
    TokenizerNotFound { location: String },

    #[error("Hugging Face Hub request for {repo} failed")]
    Hub {
        repo: String,
        #[source]
        source: hf_hub::api::sync::ApiError,
    },

    #[error("I/O error on {path}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to load tokenizer from {path}: {message}")]
    LoadTokenizer { path: PathBuf, message: String },

    #[error("invalid tokenizer_config.json")]
    TokenizerConfig(#[from] serde_json::Error),

    #[error("invalid chat template")]
    Template(#[from] minijinja::Error),

    #[error("candle error")]
    Candle(#[from] candle_core::Error),
}
