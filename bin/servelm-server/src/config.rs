//! Server configuration, parsed once at startup from flags and `SERVELM_*`
//! environment variables.

use std::path::PathBuf;

use clap::Parser;
use servelm_candle::{ModelSource, SamplingConfig};
use servelm_core::AuditSink;

pub const DEFAULT_MODEL: &str = "bartowski/Qwen2.5-0.5B-Instruct-GGUF";

/// GGUF repos rarely ship `tokenizer.json`; the default model borrows it from
/// the upstream repo.
pub const DEFAULT_TOKENIZER: &str = "Qwen/Qwen2.5-0.5B-Instruct";

/// Runtime configuration for servelm-server.
#[derive(Debug, Clone, Parser)]
#[command(name = "servelm-server", version, about = "OpenAI-compatible chat completions over a local model")]
pub struct Config {
    /// Local path or Hugging Face repo id of the GGUF model.
    #[arg(long, env = "SERVELM_MODEL", default_value = DEFAULT_MODEL)]
    pub model: String,

    /// Weights file inside the model repo or directory.
    #[arg(long, env = "SERVELM_MODEL_FILE")]
    pub model_file: Option<String>,

    /// Local path or repo id holding `tokenizer.json`.
    #[arg(long, env = "SERVELM_TOKENIZER")]
    pub tokenizer: Option<String>,

    /// Append one JSON audit line per completed request to this file.
    #[arg(long, env = "SERVELM_LOGFILE")]
    pub logfile: Option<PathBuf>,

    /// Write audit lines to stdout. Ignored when `--logfile` is set.
    #[arg(long, env = "SERVELM_LOG_STDOUT")]
    pub log_stdout: bool,

    #[arg(long, env = "SERVELM_HOST", default_value = "127.0.0.1")]
    pub host: String,

    #[arg(long, env = "SERVELM_PORT", default_value_t = 8000)]
    pub port: u16,

    /// Requests allowed to wait for the generation worker.
    #[arg(long, env = "SERVELM_QUEUE_CAPACITY", default_value_t = 64)]
    pub queue_capacity: usize,

    /// Sampling temperature; greedy decoding when unset.
    #[arg(long, env = "SERVELM_TEMPERATURE")]
    pub temperature: Option<f64>,

    /// Nucleus sampling cutoff.
    #[arg(long, env = "SERVELM_TOP_P")]
    pub top_p: Option<f64>,

    #[arg(long, env = "SERVELM_SEED", default_value_t = 299_792_458)]
    pub seed: u64,

    /// `tracing` filter string, e.g. `"info"` or `"debug,tower_http=warn"`.
    #[arg(long, env = "SERVELM_LOG", default_value = "info")]
    pub log_level: String,

    /// Emit diagnostics as newline-delimited JSON.
    #[arg(long, env = "SERVELM_LOG_JSON")]
    pub log_json: bool,

    /// Comma-separated list of allowed CORS origins; any origin when unset.
    #[arg(long, env = "SERVELM_CORS_ORIGINS")]
    pub cors_origins: Option<String>,

    /// Do not serve the Swagger UI and OpenAPI document.
    #[arg(long, env = "SERVELM_NO_SWAGGER")]
    pub no_swagger: bool,
}

impl Config {
    /// Audit sink selected by `--logfile` and `--log-stdout`; the file wins.
    pub fn audit_sink(&self) -> AuditSink {
        AuditSink::from_options(self.logfile.clone(), self.log_stdout)
    }

    /// `host:port`, bracketing IPv6 literals.
    pub fn bind_address(&self) -> String {
        if self.host.contains(':') && !self.host.starts_with('[') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }

    pub fn model_source(&self) -> ModelSource {
        let tokenizer = self
            .tokenizer
            .clone()
            .or_else(|| (self.model == DEFAULT_MODEL).then(|| DEFAULT_TOKENIZER.to_owned()));
        ModelSource {
            model: self.model.clone(),
            model_file: self.model_file.clone(),
            tokenizer,
        }
    }

    pub fn sampling(&self) -> SamplingConfig {
        SamplingConfig {
            temperature: self.temperature,
            top_p: self.top_p,
            seed: self.seed,
        }
    }

    pub fn swagger_enabled(&self) -> bool {
        !self.no_swagger
    }
}
