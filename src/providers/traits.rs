//! The capability interface every wire adapter implements.
//!
//! Adapters are stateless with respect to providers: the registry hands them
//! a [`CallTarget`] snapshot (endpoint, credential, model) for each call, so
//! one adapter instance can serve every provider of its family.
//!
//! # Example
//!
//! ```ignore
//! #[async_trait]
//! impl CompletionBackend for MyBackend {
//!     fn name(&self) -> &str { "my_backend" }
//!
//!     async fn call(&self, target: &CallTarget, request: &CompletionRequest)
//!         -> Result<CompletionResponse> { ... }
//!
//!     async fn health_check(&self, target: &CallTarget) -> Result<ProbeReport> { ... }
//! }
//! ```

use async_trait::async_trait;

use crate::Result;
use crate::types::{CompletionRequest, CompletionResponse};

/// Everything an adapter needs to reach one provider.
#[derive(Clone, Default)]
pub struct CallTarget {
    pub key: String,
    pub endpoint: String,
    pub credential: Option<String>,
    pub model: String,
    /// Version header for the messages family.
    pub api_version: Option<String>,
}

impl std::fmt::Debug for CallTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallTarget")
            .field("key", &self.key)
            .field("endpoint", &self.endpoint)
            .field("credential", &self.credential.as_ref().map(|_| "<redacted>"))
            .field("model", &self.model)
            .field("api_version", &self.api_version)
            .finish()
    }
}

impl CallTarget {
    /// The credential, or a configuration error naming the provider.
    pub fn require_credential(&self) -> Result<&str> {
        self.credential.as_deref().ok_or_else(|| {
            crate::HuginError::Configuration(format!(
                "provider '{}' has no credential configured",
                self.key
            ))
        })
    }
}

/// Outcome of a successful health probe.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProbeReport {
    /// Model identifiers the provider reported, in the order it listed them.
    pub models: Vec<String>,
}

/// A provider family's wire adapter.
#[async_trait]
pub trait CompletionBackend: Send + Sync {
    /// Adapter name for logging/debugging.
    fn name(&self) -> &str;

    /// Produce a completion for `request` against `target`.
    ///
    /// The returned response carries content, usage (when reported) and any
    /// tool calls. The dispatcher fills in provider key, model and timing.
    async fn call(
        &self,
        target: &CallTarget,
        request: &CompletionRequest,
    ) -> Result<CompletionResponse>;

    /// Lightweight availability probe. Must not generate content.
    async fn health_check(&self, target: &CallTarget) -> Result<ProbeReport>;

    /// Models the provider can currently serve.
    ///
    /// Default implementation reuses the health probe.
    async fn list_models(&self, target: &CallTarget) -> Result<Vec<String>> {
        Ok(self.health_check(target).await?.models)
    }

    /// Best-effort preparation before a call (e.g. loading a model into memory).
    ///
    /// Failures are logged by the dispatcher and never block the call.
    async fn warm_up(&self, _target: &CallTarget) -> Result<()> {
        Ok(())
    }
}
