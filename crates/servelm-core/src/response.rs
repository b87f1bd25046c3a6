//! Assembly of the OpenAI-compatible response envelope.

use chrono::{DateTime, Utc};

use crate::types::{AssistantMessage, ChatChoice, ChatCompletionResponse};
use crate::usage::UsageRecord;

/// Prefix of every completion id; the epoch-milliseconds timestamp follows.
pub const REQUEST_ID_PREFIX: &str = "servelm-request-";

/// Builds [`ChatCompletionResponse`] values for one configured model.
#[derive(Debug, Clone)]
pub struct ResponseBuilder {
    model: String,
}

impl ResponseBuilder {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Build a response stamped with the current wall-clock time.
    pub fn build(&self, content: String, usage: &UsageRecord) -> ChatCompletionResponse {
        self.build_at(content, usage, Utc::now())
    }

    /// Build a response stamped with `now`.
    pub fn build_at(
        &self,
        content: String,
        usage: &UsageRecord,
        now: DateTime<Utc>,
    ) -> ChatCompletionResponse {
        ChatCompletionResponse {
            id: format!("{REQUEST_ID_PREFIX}{}", now.timestamp_millis()),
            object: "chat.completion".into(),
            created: now.timestamp(),
            model: self.model.clone(),
            choices: vec![ChatChoice {
                index: 0,
                message: AssistantMessage {
                    role: "assistant".into(),
                    content,
                },
                finish_reason: "stop".into(),
            }],
            usage: usage.usage(),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use chrono::TimeZone;

    use super::*;

    fn usage() -> UsageRecord {
        UsageRecord::measure(8, 4, Duration::from_millis(250))
    }

    #[test]
    fn envelope_shape() {
        let now = Utc.timestamp_millis_opt(1_700_000_000_123).unwrap();
        let resp = ResponseBuilder::new("org/model-GGUF").build_at("hello".into(), &usage(), now);

        assert_eq!(resp.id, "servelm-request-1700000000123");
        assert_eq!(resp.object, "chat.completion");
        assert_eq!(resp.created, 1_700_000_000);
        assert_eq!(resp.model, "org/model-GGUF");
        assert_eq!(resp.choices.len(), 1);
        assert_eq!(resp.choices[0].index, 0);
        assert_eq!(resp.choices[0].message.role, "assistant");
        assert_eq!(resp.choices[0].message.content, "hello");
        assert_eq!(resp.choices[0].finish_reason, "stop");
        assert_eq!(resp.usage.prompt_tokens, 8);
        assert_eq!(resp.usage.completion_tokens, 4);
        assert_eq!(resp.usage.total_tokens, 12);
    }

    #[test]
    fn repeated_builds_differ_only_in_timestamps() {
        let builder = ResponseBuilder::new("m");
        let a = builder.build_at("x".into(), &usage(), Utc.timestamp_opt(100, 0).unwrap());
        let mut b = builder.build_at("x".into(), &usage(), Utc.timestamp_opt(205, 0).unwrap());
        assert_ne!(a.id, b.id);
        assert_ne!(a.created, b.created);

        b.id = a.id.clone();
        b.created = a.created;
        assert_eq!(a, b);
    }

    #[test]
    fn usage_in_body_has_only_counts() {
        let resp = ResponseBuilder::new("m").build("x".into(), &usage());
        let value = serde_json::to_value(&resp).unwrap();
        let usage = value["usage"].as_object().unwrap();
        assert_eq!(usage.len(), 3);
        assert!(usage.contains_key("total_tokens"));
    }
}
