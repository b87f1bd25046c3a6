//! Deterministic in-memory engine for tests.
//!
//! Tokens are UTF-8 bytes, the chat template is a fixed `<|role|>content`
//! layout, and generation echoes the last message. A shared [`EngineProbe`]
//! records every call so tests can check ordering and overlap.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::engine::{EngineError, GenerationEngine, TemplateOptions, TemplateOutput, TokenId};
use crate::types::Message;

/// Observations shared between a [`FakeEngine`] and the test that owns it.
#[derive(Debug, Default)]
pub struct EngineProbe {
    active: AtomicUsize,
    max_active: AtomicUsize,
    prompts: Mutex<Vec<String>>,
}

impl EngineProbe {
    /// Largest number of `generate` calls observed running at once.
    pub fn max_concurrent_generations(&self) -> usize {
        self.max_active.load(Ordering::SeqCst)
    }

    /// Prompts passed to `generate`, in call order.
    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().map(|p| p.clone()).unwrap_or_default()
    }
}

#[derive(Debug, Clone, Default)]
pub struct FakeEngine {
    template_override: Option<TemplateOutput>,
    reply: Option<String>,
    generation_failure: Option<String>,
    panics_left: usize,
    delay: Duration,
    probe: Arc<EngineProbe>,
}

impl FakeEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `apply_template` return `output` verbatim.
    pub fn with_template_output(mut self, output: TemplateOutput) -> Self {
        self.template_override = Some(output);
        self
    }

    /// Make `generate` return `reply` (still truncated to the token budget).
    pub fn with_reply(mut self, reply: impl Into<String>) -> Self {
        self.reply = Some(reply.into());
        self
    }

    /// Make `generate` fail with `message`.
    pub fn failing_generation(mut self, message: impl Into<String>) -> Self {
        self.generation_failure = Some(message.into());
        self
    }

    /// Make the next `count` calls to `generate` panic.
    pub fn panicking(mut self, count: usize) -> Self {
        self.panics_left = count;
        self
    }

    /// Sleep this long inside every `generate` call.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn probe(&self) -> Arc<EngineProbe> {
        Arc::clone(&self.probe)
    }

    /// The text the template renders for `messages`.
    pub fn render(messages: &[Message], add_generation_prompt: bool) -> String {
        let mut out = String::new();
        for m in messages {
            out.push_str(&format!("<|{}|>{}\n", m.role, m.content));
        }
        if add_generation_prompt {
            out.push_str("<|assistant|>");
        }
        out
    }
}

impl GenerationEngine for FakeEngine {
    fn apply_template(
        &self,
        messages: &[Message],
        options: TemplateOptions,
    ) -> Result<TemplateOutput, EngineError> {
        if let Some(output) = &self.template_override {
            return Ok(output.clone());
        }
        let text = Self::render(messages, options.add_generation_prompt);
        if options.tokenize {
            Ok(TemplateOutput::Tokens(text.bytes().map(i64::from).collect()))
        } else {
            Ok(TemplateOutput::Text(text))
        }
    }

    fn encode(&self, text: &str) -> Result<Vec<TokenId>, EngineError> {
        Ok(text.bytes().map(TokenId::from).collect())
    }

    fn decode(&self, tokens: &[TokenId]) -> Result<String, EngineError> {
        let bytes = tokens
            .iter()
            .map(|&t| u8::try_from(t).map_err(|_| EngineError::Tokenizer(format!("unknown token {t}"))))
            .collect::<Result<Vec<u8>, _>>()?;
        String::from_utf8(bytes).map_err(|e| EngineError::Tokenizer(e.to_string()))
    }

    fn generate(&mut self, prompt: &str, max_tokens: u64) -> Result<String, EngineError> {
        if self.panics_left > 0 {
            self.panics_left -= 1;
            panic!("fake engine panicked on {prompt:?}");
        }

        let active = self.probe.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.probe.max_active.fetch_max(active, Ordering::SeqCst);
        if let Ok(mut prompts) = self.probe.prompts.lock() {
            prompts.push(prompt.to_owned());
        }
        if !self.delay.is_zero() {
            std::thread::sleep(self.delay);
        }
        self.probe.active.fetch_sub(1, Ordering::SeqCst);

        if let Some(message) = &self.generation_failure {
            return Err(EngineError::Generation(message.clone()));
        }

        let reply = match &self.reply {
            Some(reply) => reply.clone(),
            None => {
                let last = prompt
                    .rsplit("<|assistant|>")
                    .nth(1)
                    .and_then(|before| before.lines().last())
                    .and_then(|line| line.split_once("|>"))
                    .map(|(_, content)| content)
                    .unwrap_or_default();
                format!("echo: {last}")
            }
        };
        let budget = usize::try_from(max_tokens).unwrap_or(usize::MAX);
        Ok(reply.chars().take(budget).collect())
    }
}
