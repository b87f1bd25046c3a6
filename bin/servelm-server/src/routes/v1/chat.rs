//! OpenAI-compatible chat-completion route.
//!
//! The handler only validates; templating, generation, accounting and the
//! audit line all happen on the orchestrator's worker.

use std::sync::Arc;

use axum::extract::State;
use axum::extract::rejection::JsonRejection;
use axum::routing::post;
use axum::{Json, Router};
use servelm_core::{
    AssistantMessage, ChatChoice, ChatCompletionRequest, ChatCompletionResponse, Message, Usage,
};
use tracing::debug;
use utoipa::OpenApi;
use validator::Validate;

use crate::error::ServerError;
use crate::state::AppState;

#[derive(OpenApi)]
#[openapi(
    paths(chat_completions),
    components(schemas(
        ChatCompletionRequest,
        ChatCompletionResponse,
        Message,
        AssistantMessage,
        ChatChoice,
        Usage
    ))
)]
pub struct ChatApi;

pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/chat/completions", post(chat_completions))
}

/// OpenAI chat completions (`POST /v1/chat/completions`).
///
/// Requests are served one at a time in arrival order.
#[utoipa::path(
    post,
    path = "/v1/chat/completions",
    tag = "chat",
    request_body = ChatCompletionRequest,
    responses(
        (status = 200, description = "Completion generated", body = ChatCompletionResponse),
        (status = 400, description = "Malformed or invalid request"),
        (status = 422, description = "Body does not match the request schema"),
        (status = 500, description = "Template or generation failure"),
        (status = 503, description = "Generation worker unavailable"),
    )
)]
pub async fn chat_completions(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<ChatCompletionRequest>, JsonRejection>,
) -> Result<Json<ChatCompletionResponse>, ServerError> {
    let Json(req) = payload?;
    req.validate()?;

    debug!(
        messages = req.messages.len(),
        max_tokens = req.max_tokens,
        "chat completion request"
    );
    let response = state.orchestrator.handle(req).await?;
    Ok(Json(response))
}
