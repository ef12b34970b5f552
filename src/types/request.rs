//! Completion request type

use serde::{Deserialize, Serialize};

/// A single content-generation request.
///
/// Constructed by the caller and never mutated by the router. `args` is an
/// opaque payload that only contributes to the cache fingerprint.
///
/// ```rust
/// # use hugin::CompletionRequest;
/// let request = CompletionRequest::new("Plan a 20 minute workout")
///     .user("user-42")
///     .tool("workout-planner")
///     .args(serde_json::json!({ "minutes": 20 }))
///     .max_tokens(512)
///     .temperature(0.4);
/// assert_eq!(request.tool_tag, "workout-planner");
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CompletionRequest {
    pub prompt: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    /// Logical feature name (e.g. "chat", "meal-plan").
    #[serde(default)]
    pub tool_tag: String,
    #[serde(default)]
    pub args: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
}

impl CompletionRequest {
    /// Create a request for the given prompt.
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            ..Default::default()
        }
    }

    /// Set the requesting user.
    pub fn user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    /// Set the logical feature tag.
    pub fn tool(mut self, tag: impl Into<String>) -> Self {
        self.tool_tag = tag.into();
        self
    }

    /// Set the opaque fingerprinting payload.
    pub fn args(mut self, args: serde_json::Value) -> Self {
        self.args = args;
        self
    }

    /// Set the completion token limit.
    pub fn max_tokens(mut self, n: u32) -> Self {
        self.max_tokens = Some(n);
        self
    }

    /// Set the sampling temperature.
    pub fn temperature(mut self, t: f32) -> Self {
        self.temperature = Some(t);
        self
    }
}
