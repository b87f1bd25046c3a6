//! Token accounting for a finished completion.

use std::time::Duration;

use crate::types::Usage;

/// Counts and throughput of one completion.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct UsageRecord {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
    pub generation_time_seconds: f64,
    /// Unrounded; see [`round_rate`] for the logged form.
    pub tokens_per_second: f64,
}

impl UsageRecord {
    pub fn measure(prompt_tokens: usize, completion_tokens: usize, elapsed: Duration) -> Self {
        let prompt_tokens = prompt_tokens as u64;
        let completion_tokens = completion_tokens as u64;
        let generation_time_seconds = elapsed.as_secs_f64();
        Self {
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens + completion_tokens,
            generation_time_seconds,
            tokens_per_second: tokens_per_second(completion_tokens, generation_time_seconds),
        }
    }

    /// The counts carried in the response body.
    pub fn usage(&self) -> Usage {
        Usage {
            prompt_tokens: self.prompt_tokens,
            completion_tokens: self.completion_tokens,
            total_tokens: self.total_tokens,
        }
    }
}

/// Completion tokens per second, or `0.0` when no time was measured.
pub fn tokens_per_second(completion_tokens: u64, seconds: f64) -> f64 {
    if seconds > 0.0 && seconds.is_finite() {
        completion_tokens as f64 / seconds
    } else {
        0.0
    }
}

/// Round a rate to two decimal places for the audit line.
pub fn round_rate(rate: f64) -> f64 {
    (rate * 100.0).round() / 100.0
}
