//! Wire adapters, one per provider family.
//!
//! Adapters are looked up by provider key first (for per-provider overrides,
//! mostly used in tests) and fall back to the family default.

pub mod chat_completions;
pub mod messages;
pub mod retry;
pub mod self_hosted;
pub mod traits;

use std::collections::HashMap;
use std::sync::Arc;

use reqwest::Client;

pub use chat_completions::ChatCompletionsBackend;
pub use messages::MessagesBackend;
pub use retry::RetryConfig;
pub use self_hosted::SelfHostedBackend;
pub use traits::{CallTarget, CompletionBackend, ProbeReport};

use crate::types::ProviderFamily;
use crate::{HuginError, Result};

/// Adapter lookup table.
#[derive(Clone)]
pub struct BackendSet {
    self_hosted: Arc<dyn CompletionBackend>,
    chat_completions: Arc<dyn CompletionBackend>,
    messages: Arc<dyn CompletionBackend>,
    overrides: HashMap<String, Arc<dyn CompletionBackend>>,
}

impl BackendSet {
    /// Default adapters sharing one connection pool.
    pub fn new(client: Client, self_hosted_retry: RetryConfig) -> Self {
        Self {
            self_hosted: Arc::new(
                SelfHostedBackend::new(client.clone()).with_retry_config(self_hosted_retry),
            ),
            chat_completions: Arc::new(ChatCompletionsBackend::new(client.clone())),
            messages: Arc::new(MessagesBackend::new(client)),
            overrides: HashMap::new(),
        }
    }

    /// Route one provider key to a specific adapter.
    pub fn with_override(mut self, key: impl Into<String>, backend: Arc<dyn CompletionBackend>) -> Self {
        self.overrides.insert(key.into(), backend);
        self
    }

    /// Adapter for a provider.
    pub fn for_provider(&self, key: &str, family: ProviderFamily) -> Arc<dyn CompletionBackend> {
        if let Some(backend) = self.overrides.get(key) {
            return Arc::clone(backend);
        }
        match family {
            ProviderFamily::SelfHosted => Arc::clone(&self.self_hosted),
            ProviderFamily::ChatCompletions => Arc::clone(&self.chat_completions),
            ProviderFamily::Messages => Arc::clone(&self.messages),
        }
    }
}

/// Map a non-2xx response to [`HuginError::Api`] carrying the body text.
pub(crate) async fn check_status(response: reqwest::Response) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response
        .text()
        .await
        .unwrap_or_else(|_| "failed to read error body".to_string());
    let message = if body.trim().is_empty() {
        status.to_string()
    } else {
        body
    };
    Err(HuginError::Api {
        status: status.as_u16(),
        message,
    })
}

/// `{base}/{path}` without doubled slashes.
pub(crate) fn join_url(base: &str, path: &str) -> String {
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}

/// Replace a trailing `suffix` on a full request URL with `replacement`.
///
/// Endpoints that do not end in `suffix` are treated as a base URL.
pub(crate) fn sibling_url(endpoint: &str, suffix: &str, replacement: &str) -> String {
    let trimmed = endpoint.trim_end_matches('/');
    match trimmed.strip_suffix(suffix) {
        Some(base) => format!("{base}{replacement}"),
        None => join_url(trimmed, replacement),
    }
}
