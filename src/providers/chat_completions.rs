//! Hosted chat-completions adapter (bearer auth, `choices[].message`).

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::traits::{CallTarget, CompletionBackend, ProbeReport};
use super::{check_status, sibling_url};
use crate::types::{CompletionRequest, CompletionResponse, Usage};
use crate::{HuginError, Result};

/// Completion cap sent when the request leaves `max_tokens` unset.
pub(crate) const DEFAULT_MAX_TOKENS: u32 = 1024;

/// Adapter for chat-completions style APIs.
pub struct ChatCompletionsBackend {
    client: Client,
}

#[derive(Serialize)]
struct ChatBody<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 1],
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatReply {
    #[serde(default)]
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<ReplyUsage>,
}

#[derive(Deserialize)]
struct Choice {
    message: ReplyMessage,
}

#[derive(Deserialize)]
struct ReplyMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Vec<serde_json::Value>,
}

#[derive(Deserialize)]
struct ReplyUsage {
    #[serde(default)]
    prompt_tokens: u32,
    #[serde(default)]
    completion_tokens: u32,
    #[serde(default)]
    total_tokens: Option<u32>,
}

#[derive(Deserialize)]
struct ModelList {
    #[serde(default)]
    data: Vec<ModelEntry>,
}

#[derive(Deserialize)]
struct ModelEntry {
    id: String,
}

impl ChatCompletionsBackend {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

impl From<ReplyUsage> for Usage {
    fn from(u: ReplyUsage) -> Self {
        let mut usage = Usage::new(u.prompt_tokens, u.completion_tokens);
        if let Some(total) = u.total_tokens {
            usage.total_tokens = total;
        }
        usage
    }
}

#[async_trait]
impl CompletionBackend for ChatCompletionsBackend {
    fn name(&self) -> &str {
        "chat_completions"
    }

    async fn call(
        &self,
        target: &CallTarget,
        request: &CompletionRequest,
    ) -> Result<CompletionResponse> {
        let credential = target.require_credential()?;
        debug!(provider = %target.key, model = %target.model, "calling chat completions");

        let body = ChatBody {
            model: &target.model,
            messages: [ChatMessage {
                role: "user",
                content: &request.prompt,
            }],
            max_tokens: request.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
            temperature: request.temperature,
        };
        let response = self
            .client
            .post(&target.endpoint)
            .bearer_auth(credential)
            .json(&body)
            .send()
            .await?;
        let reply: ChatReply = check_status(response).await?.json().await?;

        let choice = reply
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| HuginError::Parse("response contained no choices".to_string()))?;
        Ok(CompletionResponse {
            content: choice.message.content.unwrap_or_default(),
            usage: reply.usage.map(Usage::from),
            tool_calls: choice.message.tool_calls,
            ..Default::default()
        })
    }

    async fn health_check(&self, target: &CallTarget) -> Result<ProbeReport> {
        let credential = target.require_credential()?;
        let response = self
            .client
            .get(sibling_url(&target.endpoint, "/chat/completions", "/models"))
            .bearer_auth(credential)
            .send()
            .await?;
        let list: ModelList = check_status(response).await?.json().await?;
        Ok(ProbeReport {
            models: list.data.into_iter().map(|m| m.id).collect(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn body_shape() {
        let body = ChatBody {
            model: "gpt",
            messages: [ChatMessage {
                role: "user",
                content: "ping",
            }],
            max_tokens: 16,
            temperature: Some(0.5),
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["messages"][0]["role"], "user");
        assert_eq!(json["messages"][0]["content"], "ping");
        assert_eq!(json["max_tokens"], 16);
        assert_eq!(json["temperature"], 0.5);
    }

    #[test]
    fn usage_keeps_reported_total() {
        let usage: Usage = ReplyUsage {
            prompt_tokens: 3,
            completion_tokens: 4,
            total_tokens: Some(9),
        }
        .into();
        assert_eq!(usage.total_tokens, 9);
    }
}
