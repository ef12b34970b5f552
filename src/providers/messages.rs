//! Hosted messages adapter (key + version headers, `content[].text`).

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::chat_completions::DEFAULT_MAX_TOKENS;
use super::traits::{CallTarget, CompletionBackend, ProbeReport};
use super::{check_status, sibling_url};
use crate::{HuginError, Result};
use crate::types::{CompletionRequest, CompletionResponse, Usage};

/// Version header value used when the provider config sets none.
pub const DEFAULT_API_VERSION: &str = "2023-06-01";

/// Adapter for messages style APIs.
pub struct MessagesBackend {
    client: Client,
}

#[derive(Serialize)]
struct MessagesBody<'a> {
    model: &'a str,
    max_tokens: u32,
    messages: [Message<'a>; 1],
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

#[derive(Serialize)]
struct Message<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Deserialize)]
struct MessagesReply {
    content: Vec<ContentBlock>,
    #[serde(default)]
    usage: Option<ReplyUsage>,
}

#[derive(Deserialize)]
struct ContentBlock {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Deserialize)]
struct ReplyUsage {
    #[serde(default)]
    input_tokens: u32,
    #[serde(default)]
    output_tokens: u32,
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

impl MessagesBackend {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn request(
        &self,
        method: reqwest::Method,
        url: &str,
        target: &CallTarget,
    ) -> Result<reqwest::RequestBuilder> {
        let credential = target.require_credential()?;
        Ok(self
            .client
            .request(method, url)
            .header("x-api-key", credential)
            .header(
                "anthropic-version",
                target.api_version.as_deref().unwrap_or(DEFAULT_API_VERSION),
            ))
    }
}

#[async_trait]
impl CompletionBackend for MessagesBackend {
    fn name(&self) -> &str {
        "messages"
    }

    async fn call(
        &self,
        target: &CallTarget,
        request: &CompletionRequest,
    ) -> Result<CompletionResponse> {
        debug!(provider = %target.key, model = %target.model, "calling messages");
        let body = MessagesBody {
            model: &target.model,
            max_tokens: request.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
            messages: [Message {
                role: "user",
                content: &request.prompt,
            }],
            temperature: request.temperature,
        };
        let response = self
            .request(reqwest::Method::POST, &target.endpoint, target)?
            .json(&body)
            .send()
            .await?;
        let reply: MessagesReply = check_status(response).await?.json().await?;

        let texts: Vec<String> = reply
            .content
            .into_iter()
            .filter_map(|block| block.text)
            .collect();
        if texts.is_empty() {
            return Err(HuginError::Parse(
                "response contained no text content".to_string(),
            ));
        }
        Ok(CompletionResponse {
            content: texts.concat(),
            usage: reply
                .usage
                .map(|u| Usage::new(u.input_tokens, u.output_tokens)),
            ..Default::default()
        })
    }

    async fn health_check(&self, target: &CallTarget) -> Result<ProbeReport> {
        let url = sibling_url(&target.endpoint, "/messages", "/models");
        let response = self
            .request(reqwest::Method::GET, &url, target)?
            .send()
            .await?;
        let list: ModelList = check_status(response).await?.json().await?;
        Ok(ProbeReport {
            models: list.data.into_iter().map(|m| m.id).collect(),
        })
    }
}
