//! [`GenerationEngine`](servelm_core::GenerationEngine) backed by candle's
//! quantized GGUF models and a Hugging Face tokenizer.

pub mod engine;
pub mod error;
pub mod source;
pub mod template;

#[cfg(test)]
mod test;

pub use engine::{CandleEngine, SamplingConfig};
pub use error::CandleEngineError;
pub use source::{ModelFiles, ModelSource};
pub use template::ChatTemplate;
