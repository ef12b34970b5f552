//! Self-hosted model server adapter (`/api/generate`, `/api/tags`).

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::retry::{RetryConfig, with_retry};
use super::traits::{CallTarget, CompletionBackend, ProbeReport};
use super::{check_status, join_url};
use crate::Result;
use crate::types::{CompletionRequest, CompletionResponse};

/// Adapter for self-hosted model servers.
///
/// Calls are retried on transient errors to ride out model loading.
pub struct SelfHostedBackend {
    client: Client,
    retry: RetryConfig,
}

#[derive(Serialize)]
struct GenerateBody<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    options: Option<GenerateOptions>,
}

#[derive(Serialize)]
struct GenerateOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    num_predict: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

#[derive(Deserialize)]
struct GenerateReply {
    response: String,
}

#[derive(Deserialize)]
struct ModelList {
    #[serde(default)]
    models: Vec<ModelEntry>,
}

#[derive(Deserialize)]
struct ModelEntry {
    name: String,
}

impl SelfHostedBackend {
    pub fn new(client: Client) -> Self {
        Self {
            client,
            retry: RetryConfig::default(),
        }
    }

    /// Override the in-adapter retry policy.
    pub fn with_retry_config(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    async fn generate_once(
        &self,
        target: &CallTarget,
        request: &CompletionRequest,
    ) -> Result<CompletionResponse> {
        let options = (request.max_tokens.is_some() || request.temperature.is_some()).then(|| {
            GenerateOptions {
                num_predict: request.max_tokens,
                temperature: request.temperature,
            }
        });
        let body = GenerateBody {
            model: &target.model,
            prompt: &request.prompt,
            stream: false,
            options,
        };
        let response = self
            .client
            .post(join_url(&target.endpoint, "api/generate"))
            .json(&body)
            .send()
            .await?;
        let reply: GenerateReply = check_status(response).await?.json().await?;
        Ok(CompletionResponse {
            content: reply.response,
            ..Default::default()
        })
    }

    async fn loaded_models(&self, target: &CallTarget) -> Result<Vec<String>> {
        let response = self
            .client
            .get(join_url(&target.endpoint, "api/ps"))
            .send()
            .await?;
        let list: ModelList = check_status(response).await?.json().await?;
        Ok(list.models.into_iter().map(|m| m.name).collect())
    }
}

/// Whether a server-reported model name refers to `wanted`.
///
/// Servers report untagged models with an implicit `:latest` suffix.
pub(crate) fn model_matches(listed: &str, wanted: &str) -> bool {
    listed == wanted
        || listed.strip_suffix(":latest") == Some(wanted)
        || wanted.strip_suffix(":latest") == Some(listed)
}

#[async_trait]
impl CompletionBackend for SelfHostedBackend {
    fn name(&self) -> &str {
        "self_hosted"
    }

    async fn call(
        &self,
        target: &CallTarget,
        request: &CompletionRequest,
    ) -> Result<CompletionResponse> {
        debug!(provider = %target.key, model = %target.model, "calling self-hosted generate");
        with_retry(&self.retry, &target.key, "generate", || {
            self.generate_once(target, request)
        })
        .await
    }

    async fn health_check(&self, target: &CallTarget) -> Result<ProbeReport> {
        let response = self
            .client
            .get(join_url(&target.endpoint, "api/tags"))
            .send()
            .await?;
        let list: ModelList = check_status(response).await?.json().await?;
        Ok(ProbeReport {
            models: list.models.into_iter().map(|m| m.name).collect(),
        })
    }

    async fn warm_up(&self, target: &CallTarget) -> Result<()> {
        let loaded = self.loaded_models(target).await?;
        if loaded.iter().any(|m| model_matches(m, &target.model)) {
            return Ok(());
        }
        info!(provider = %target.key, model = %target.model, "loading model before first call");
        // An empty prompt makes the server load the model without generating.
        let body = GenerateBody {
            model: &target.model,
            prompt: "",
            stream: false,
            options: None,
        };
        let response = self
            .client
            .post(join_url(&target.endpoint, "api/generate"))
            .json(&body)
            .send()
            .await?;
        check_status(response).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn latest_suffix_is_implicit() {
        assert!(model_matches("llama3:latest", "llama3"));
        assert!(model_matches("llama3", "llama3:latest"));
        assert!(model_matches("llama3:8b", "llama3:8b"));
        assert!(!model_matches("llama3:8b", "llama3"));
    }

    #[test]
    fn options_omitted_when_unset() {
        let body = GenerateBody {
            model: "m",
            prompt: "p",
            stream: false,
            options: None,
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"model": "m", "prompt": "p", "stream": false})
        );
    }
}
