//! Response and usage types

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// A completed generation, tagged with the provider that produced it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CompletionResponse {
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
    pub provider_key: String,
    /// Model that served the request.
    pub model: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timing: Option<Timing>,
    /// Raw tool calls returned by chat-completions style providers.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<serde_json::Value>,
}

/// Token usage statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

impl Usage {
    /// Build usage from prompt and completion counts.
    pub fn new(prompt_tokens: u32, completion_tokens: u32) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens.saturating_add(completion_tokens),
        }
    }
}

/// Wall-clock generation timing.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Timing {
    pub duration_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tokens_per_second: Option<f64>,
}

impl Timing {
    /// Timing for `completion_tokens` generated over `elapsed`.
    ///
    /// Throughput is omitted when the elapsed time rounds to zero.
    pub fn measured(elapsed: Duration, completion_tokens: u32) -> Self {
        let secs = elapsed.as_secs_f64();
        let tokens_per_second = (secs > 0.0).then(|| f64::from(completion_tokens) / secs);
        Self {
            duration_ms: elapsed.as_millis() as u64,
            tokens_per_second,
        }
    }
}

/// Rough token estimate used when a provider does not report usage.
pub fn estimate_tokens(text: &str) -> u32 {
    let chars = text.chars().count();
    u32::try_from(chars.div_ceil(4)).unwrap_or(u32::MAX)
}
