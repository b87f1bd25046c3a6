//! Completion orchestration.
//!
//! # Architecture
//!
//! ```text
//! handler ──► job_tx ──► [completion worker thread] ──► reply_tx ──► handler
//!              (FIFO)      owns the GenerationEngine
//!                          template → decode → generate → encode
//!                          usage → response → audit line
//! ```
//!
//! The engine is owned by exactly one OS thread, so at most one generation
//! runs at a time and jobs are served in arrival order. A caller that goes
//! away does not interrupt its job: the worker finishes it and the reply is
//! dropped. An engine panic fails only the job that triggered it.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, info_span};

use crate::audit::{AuditLine, AuditLogger};
use crate::engine::{EngineError, GenerationEngine, TemplateOptions, TemplateOutput, TokenId};
use crate::error::CompletionError;
use crate::response::ResponseBuilder;
use crate::types::{ChatCompletionRequest, ChatCompletionResponse};
use crate::usage::UsageRecord;

// ── Pipeline ──────────────────────────────────────────────────────────────────

/// A finished completion and the accounting that produced it.
#[derive(Debug, Clone)]
pub struct Completion {
    pub response: ChatCompletionResponse,
    pub usage: UsageRecord,
}

/// Runs one request against an engine, synchronously.
pub struct CompletionPipeline<E> {
    engine: E,
    responses: ResponseBuilder,
}

impl<E: GenerationEngine> CompletionPipeline<E> {
    pub fn new(engine: E, responses: ResponseBuilder) -> Self {
        Self { engine, responses }
    }

    pub fn run(&mut self, request: &ChatCompletionRequest) -> Result<Completion, CompletionError> {
        let start = Instant::now();

        let output = self
            .engine
            .apply_template(&request.messages, TemplateOptions::default())
            .map_err(|e| CompletionError::Template(e.to_string()))?;
        let prompt_tokens = prompt_token_ids(output)?;

        // `generate` takes prompt text, so the template tokens go back through
        // the tokenizer once.
        let prompt = self.engine.decode(&prompt_tokens)?;
        debug!(prompt_tokens = prompt_tokens.len(), max_tokens = request.max_tokens, "prompt ready");

        let text = self.engine.generate(&prompt, request.max_tokens)?;

        // The re-encoded length is the billed completion size.
        let completion_tokens = self.engine.encode(&text)?.len();
        let usage = UsageRecord::measure(prompt_tokens.len(), completion_tokens, start.elapsed());

        info!(
            prompt_tokens = usage.prompt_tokens,
            completion_tokens = usage.completion_tokens,
            generation_time = usage.generation_time_seconds,
            tokens_per_second = usage.tokens_per_second,
            "completion generated"
        );

        let response = self.responses.build(text, &usage);
        Ok(Completion { response, usage })
    }
}

/// Accept only a non-empty sequence of ids that fit a [`TokenId`].
fn prompt_token_ids(output: TemplateOutput) -> Result<Vec<TokenId>, CompletionError> {
    let ids = match output {
        TemplateOutput::Tokens(ids) => ids,
        other => {
            return Err(CompletionError::Template(format!(
                "expected token ids from chat template, got {}",
                other.kind()
            )));
        }
    };
    if ids.is_empty() {
        return Err(CompletionError::EmptyPrompt);
    }
    ids.into_iter()
        .map(|id| {
            TokenId::try_from(id).map_err(|_| {
                CompletionError::Template(format!("chat template returned invalid token id {id}"))
            })
        })
        .collect()
}

// ── Worker ────────────────────────────────────────────────────────────────────

struct Job {
    request: ChatCompletionRequest,
    reply_tx: oneshot::Sender<Result<ChatCompletionResponse, CompletionError>>,
}

struct CompletionWorker<E> {
    pipeline: CompletionPipeline<E>,
    audit: Arc<AuditLogger>,
    job_rx: mpsc::Receiver<Job>,
}

impl<E: GenerationEngine> CompletionWorker<E> {
    fn run(mut self) {
        let mut served: u64 = 0;
        while let Some(job) = self.job_rx.blocking_recv() {
            served += 1;
            let span = info_span!("completion", job = served, messages = job.request.messages.len());
            let _entered = span.enter();

            let result = panic::catch_unwind(AssertUnwindSafe(|| self.pipeline.run(&job.request)))
                .unwrap_or_else(|payload| {
                    error!(panic = %panic_message(payload.as_ref()), "engine panicked");
                    Err(CompletionError::Generation(EngineError::Generation(
                        "engine panicked".into(),
                    )))
                });
            match &result {
                Ok(completion) => {
                    if self.audit.is_enabled() {
                        self.audit.record(&AuditLine::new(
                            &job.request,
                            &completion.response,
                            &completion.usage,
                        ));
                    }
                }
                Err(e) => error!(error = %e, "completion failed"),
            }

            if job.reply_tx.send(result.map(|c| c.response)).is_err() {
                debug!("caller went away before the completion finished");
            }
        }
        info!(served, "completion worker stopped");
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("non-string panic payload")
}

/// Handle to the completion worker. Cheap to clone.
///
/// The worker thread exits once every clone has been dropped.
#[derive(Clone, Debug)]
pub struct Orchestrator {
    job_tx: mpsc::Sender<Job>,
    model: Arc<str>,
}

impl Orchestrator {
    /// Move `engine` onto a dedicated worker thread and start serving jobs.
    ///
    /// `queue_capacity` bounds the number of waiting jobs; further callers
    /// wait in [`Self::handle`] until a slot frees up.
    pub fn start<E: GenerationEngine>(
        engine: E,
        model: impl Into<String>,
        audit: Arc<AuditLogger>,
        queue_capacity: usize,
    ) -> std::io::Result<Self> {
        let model: String = model.into();
        let (job_tx, job_rx) = mpsc::channel(queue_capacity.max(1));

        let worker = CompletionWorker {
            pipeline: CompletionPipeline::new(engine, ResponseBuilder::new(model.clone())),
            audit,
            job_rx,
        };
        std::thread::Builder::new()
            .name("completion-worker".into())
            .spawn(move || worker.run())?;

        Ok(Self {
            job_tx,
            model: model.into(),
        })
    }

    /// Configured model identifier.
    pub fn model(&self) -> &str {
        &self.model
    }

    /// Queue `request` and wait for its response.
    pub async fn handle(
        &self,
        request: ChatCompletionRequest,
    ) -> Result<ChatCompletionResponse, CompletionError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.job_tx
            .send(Job { request, reply_tx })
            .await
            .map_err(|_| CompletionError::WorkerUnavailable)?;
        reply_rx
            .await
            .map_err(|_| CompletionError::WorkerUnavailable)?
    }
}
