//! Quantized GGUF inference on candle.

use std::collections::HashSet;
use std::fmt::Display;
use std::fs::File;

use candle_core::quantized::gguf_file;
use candle_core::{DType, Device, Tensor};
use candle_transformers::generation::LogitsProcessor;
use candle_transformers::models::{quantized_llama, quantized_qwen2};
use servelm_core::{
    EngineError, GenerationEngine, Message, TemplateOptions, TemplateOutput, TokenId,
};
use tokenizers::Tokenizer;
use tracing::{debug, info};

use crate::error::CandleEngineError;
use crate::source::ModelFiles;
use crate::template::ChatTemplate;

/// Used when the GGUF metadata does not declare a context length.
const DEFAULT_CONTEXT_LENGTH: usize = 4096;

/// Special tokens that end a turn in the common chat formats.
const STOP_TOKENS: &[&str] = &["<|im_end|>", "<|endoftext|>", "<|eot_id|>", "</s>"];

/// Sampling parameters shared by every request.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SamplingConfig {
    /// `None` samples greedily.
    pub temperature: Option<f64>,
    pub top_p: Option<f64>,
    pub seed: u64,
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self {
            temperature: None,
            top_p: None,
            seed: 299_792_458,
        }
    }
}

enum Weights {
    Llama(quantized_llama::ModelWeights),
    Qwen2(quantized_qwen2::ModelWeights),
}

impl Weights {
    /// Logits for the last position. `index_pos == 0` restarts the KV cache.
    fn forward(&mut self, input: &Tensor, index_pos: usize) -> candle_core::Result<Tensor> {
        match self {
            Weights::Llama(m) => m.forward(input, index_pos),
            Weights::Qwen2(m) => m.forward(input, index_pos),
        }
    }
}

/// A loaded model, its tokenizer and chat template.
///
/// `generate` takes `&mut self` because it drives the model's KV cache; the
/// orchestrator's worker thread is the only caller.
pub struct CandleEngine {
    weights: Weights,
    tokenizer: Tokenizer,
    template: ChatTemplate,
    device: Device,
    sampling: SamplingConfig,
    eos_tokens: HashSet<TokenId>,
    context_length: usize,
}

impl std::fmt::Debug for CandleEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CandleEngine")
            .field("device", &self.device)
            .field("sampling", &self.sampling)
            .field("eos_tokens", &self.eos_tokens)
            .field("context_length", &self.context_length)
            .finish_non_exhaustive()
    }
}

impl CandleEngine {
    /// Load weights, tokenizer and template. Blocks for the duration of the
    /// read; call from a blocking thread.
    pub fn load(files: &ModelFiles, sampling: SamplingConfig) -> Result<Self, CandleEngineError> {
        let device = select_device()?;

        let mut file = File::open(&files.weights).map_err(|source| CandleEngineError::Io {
            path: files.weights.clone(),
            source,
        })?;
        let content =
            gguf_file::Content::read(&mut file).map_err(|e| e.with_path(&files.weights))?;

        let architecture = metadata_string(&content, "general.architecture")
            .unwrap_or_else(|| "llama".to_owned());
        let context_length = content
            .metadata
            .get(&format!("{architecture}.context_length"))
            .and_then(|v| v.to_u32().ok())
            .map(|v| v as usize)
            .unwrap_or(DEFAULT_CONTEXT_LENGTH);
        let gguf_eos = content
            .metadata
            .get("tokenizer.ggml.eos_token_id")
            .and_then(|v| v.to_u32().ok());

        let weights = match architecture.as_str() {
            "qwen2" => Weights::Qwen2(quantized_qwen2::ModelWeights::from_gguf(
                content, &mut file, &device,
            )?),
            _ => Weights::Llama(quantized_llama::ModelWeights::from_gguf(
                content, &mut file, &device,
            )?),
        };
        // quantized_llama sizes its rotary tables to its own maximum.
        let context_length = match weights {
            Weights::Llama(_) => context_length.min(quantized_llama::MAX_SEQ_LEN),
            Weights::Qwen2(_) => context_length,
        };

        let tokenizer = Tokenizer::from_file(&files.tokenizer).map_err(|e| {
            CandleEngineError::LoadTokenizer {
                path: files.tokenizer.clone(),
                message: e.to_string(),
            }
        })?;

        let template = match &files.tokenizer_config {
            Some(path) => ChatTemplate::from_tokenizer_config(path)?,
            None => ChatTemplate::chatml()?,
        };

        let mut eos_tokens: HashSet<TokenId> = STOP_TOKENS
            .iter()
            .copied()
            .chain(std::iter::once(template.eos_token()))
            .filter_map(|t| tokenizer.token_to_id(t))
            .collect();
        eos_tokens.extend(gguf_eos);

        info!(
            weights = %files.weights.display(),
            %architecture,
            context_length,
            ?device,
            eos_tokens = eos_tokens.len(),
            "model loaded"
        );

        Ok(Self {
            weights,
            tokenizer,
            template,
            device,
            sampling,
            eos_tokens,
            context_length,
        })
    }

    fn sample_next(
        &mut self,
        logits_processor: &mut LogitsProcessor,
        input: &[TokenId],
        index_pos: usize,
    ) -> candle_core::Result<TokenId> {
        let input = Tensor::new(input, &self.device)?.unsqueeze(0)?;
        let logits = self
            .weights
            .forward(&input, index_pos)?
            .squeeze(0)?
            .to_dtype(DType::F32)?;
        logits_processor.sample(&logits)
    }
}

impl GenerationEngine for CandleEngine {
    fn apply_template(
        &self,
        messages: &[Message],
        options: TemplateOptions,
    ) -> Result<TemplateOutput, EngineError> {
        let text = self
            .template
            .render(messages, options.add_generation_prompt)
            .map_err(|e| EngineError::Template(error_chain(&e)))?;
        if !options.tokenize {
            return Ok(TemplateOutput::Text(text));
        }
        let ids = self.encode(&text)?;
        Ok(TemplateOutput::Tokens(ids.into_iter().map(i64::from).collect()))
    }

    fn encode(&self, text: &str) -> Result<Vec<TokenId>, EngineError> {
        self.tokenizer
            .encode(text, false)
            .map(|encoding| encoding.get_ids().to_vec())
            .map_err(|e| EngineError::Tokenizer(e.to_string()))
    }

    fn decode(&self, tokens: &[TokenId]) -> Result<String, EngineError> {
        // Special tokens stay in the text so a templated prompt re-encodes to
        // the same ids.
        self.tokenizer
            .decode(tokens, false)
            .map_err(|e| EngineError::Tokenizer(e.to_string()))
    }

    fn generate(&mut self, prompt: &str, max_tokens: u64) -> Result<String, EngineError> {
        let prompt_tokens = self.encode(prompt)?;
        if prompt_tokens.is_empty() {
            return Err(EngineError::Generation("prompt encodes to no tokens".into()));
        }
        if prompt_tokens.len() >= self.context_length {
            return Err(EngineError::Generation(format!(
                "prompt of {} tokens exceeds the context length of {}",
                prompt_tokens.len(),
                self.context_length
            )));
        }
        let budget = usize::try_from(max_tokens)
            .unwrap_or(usize::MAX)
            .min(self.context_length - prompt_tokens.len());

        let mut logits_processor = LogitsProcessor::new(
            self.sampling.seed,
            self.sampling.temperature,
            self.sampling.top_p,
        );
        let mut generated: Vec<TokenId> = Vec::with_capacity(budget);
        let prompt_len = prompt_tokens.len();
        let mut input = prompt_tokens;
        let mut index_pos = 0;

        while generated.len() < budget {
            let next = self
                .sample_next(&mut logits_processor, &input, index_pos)
                .map_err(generation_error)?;
            index_pos += input.len();
            if self.eos_tokens.contains(&next) {
                break;
            }
            generated.push(next);
            input = vec![next];
        }

        debug!(
            prompt_tokens = prompt_len,
            generated = generated.len(),
            budget,
            "generation finished"
        );
        self.tokenizer
            .decode(&generated, true)
            .map_err(|e| EngineError::Tokenizer(e.to_string()))
    }
}

fn metadata_string(content: &gguf_file::Content, key: &str) -> Option<String> {
    content
        .metadata
        .get(key)
        .and_then(|v| v.to_string().ok())
        .cloned()
}

#[cfg(feature = "cuda")]
fn select_device() -> Result<Device, CandleEngineError> {
    Ok(Device::new_cuda(0)?)
}

#[cfg(all(feature = "metal", not(feature = "cuda")))]
fn select_device() -> Result<Device, CandleEngineError> {
    Ok(Device::new_metal(0)?)
}

#[cfg(not(any(feature = "cuda", feature = "metal")))]
fn select_device() -> Result<Device, CandleEngineError> {
    Ok(Device::Cpu)
}

fn generation_error(e: impl Display) -> EngineError {
    EngineError::Generation(e.to_string())
}

/// Flatten an error and its sources into one message.
fn error_chain(e: &dyn std::error::Error) -> String {
    let mut message = e.to_string();
    let mut source = e.source();
    while let Some(inner) = source {
        message.push_str(": ");
        message.push_str(&inner.to_string());
        source = inner.source();
    }
    message
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, thiserror::Error)]
    #[error("outer")]
    struct Outer(#[source] std::io::Error);

    #[test]
    fn error_chain_joins_sources() {
        let e = Outer(std::io::Error::other("inner"));
        assert_eq!(error_chain(&e), "outer: inner");
    }

    #[test]
    fn default_sampling_is_greedy() {
        let sampling = SamplingConfig::default();
        assert_eq!(sampling.temperature, None);
        assert_eq!(sampling.top_p, None);
    }
}
