//! Request dispatcher and the administrative surface around it.
//!
//! [`Router`] ties the registry, prober, selector, cache and usage recorder
//! together. It is cheap to clone and meant to be constructed once by the
//! application and shared.
//!
//! # Dispatch
//!
//! For each candidate in priority order: check the cache under a fingerprint
//! that includes the provider key and model, warm the model on self-hosted
//! servers, call the adapter under the per-call deadline, then cache and
//! account the result. Failures move on to the next candidate; only the
//! prober ever changes a provider's availability.

mod builder;

pub use builder::RouterBuilder;

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::sync::{OnceCell, RwLock};
use tracing::{debug, info, instrument, warn};

use crate::cache::{CacheStats, Fingerprint, ResponseCache};
use crate::config::{SettingsSnapshot, SettingsStore, WeightsConfig};
use crate::health::{HealthProber, ProbeSummary};
use crate::providers::BackendSet;
use crate::providers::self_hosted::model_matches;
use crate::registry::{Provider, ProviderRegistry, ProviderState};
use crate::selector::PrioritySelector;
use crate::telemetry;
use crate::types::{
    CompletionRequest, CompletionResponse, ProviderFamily, ProviderStats, Timing, estimate_tokens,
};
use crate::usage::{UsageRecord, UsageRecorder, UsageSummary};
use crate::{HuginError, Result};

/// Configured defaults and weights, reported as-is.
///
/// Ordering uses explicit priorities only; these values are informational.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RoutingSummary {
    pub default_provider: Option<String>,
    pub default_model: Option<String>,
    pub weights: WeightsConfig,
    pub request_timeout_secs: u64,
}

/// Multi-backend completion router.
#[derive(Clone)]
pub struct Router {
    inner: Arc<RouterInner>,
}

struct RouterInner {
    settings: Arc<dyn SettingsStore>,
    registry: ProviderRegistry,
    backends: BackendSet,
    prober: HealthProber,
    selector: PrioritySelector,
    cache: ResponseCache,
    usage: UsageRecorder,
    request_timeout_ms: AtomicU64,
    /// Set when the builder chose a timeout; settings then no longer apply.
    timeout_pinned: bool,
    routing: RwLock<RoutingSummary>,
    init: OnceCell<()>,
}

impl Router {
    /// Create a builder.
    pub fn builder() -> RouterBuilder {
        RouterBuilder::new()
    }

    /// Load providers and run the first probe round.
    ///
    /// Idempotent: concurrent first callers share one initialization, later
    /// calls return immediately. A failed initialization is retried by the
    /// next call.
    pub async fn initialize(&self) -> Result<()> {
        self.inner
            .init
            .get_or_try_init(|| async {
                self.reload().await?;
                Ok::<(), HuginError>(())
            })
            .await?;
        Ok(())
    }

    /// Whether [`initialize`](Self::initialize) or a refresh has completed.
    pub fn is_initialized(&self) -> bool {
        self.inner.init.initialized()
    }

    /// Wait until at least one probe round has finished.
    pub async fn wait_until_probed(&self) {
        let mut signal = self.inner.prober.subscribe();
        // The sender lives in `inner`, which `self` keeps alive.
        let _ = signal.wait_for(|rounds| *rounds > 0).await;
    }

    /// Re-read settings into the registry and re-probe every provider.
    #[instrument(name = "hugin.refresh", skip(self))]
    pub async fn refresh_providers(&self) -> Result<ProbeSummary> {
        let summary = self.reload().await?;
        // A refresh completes initialization too; losing the race is fine.
        let _ = self.inner.init.set(());
        Ok(summary)
    }

    async fn reload(&self) -> Result<ProbeSummary> {
        let snapshot = self.inner.settings.snapshot().await?;
        self.inner
            .registry
            .sync(&snapshot, &self.inner.backends)
            .await;
        self.apply_router_settings(&snapshot).await;
        Ok(self.inner.prober.probe_all(&self.inner.registry).await)
    }

    async fn apply_router_settings(&self, snapshot: &SettingsSnapshot) {
        let router = &snapshot.config.router;
        if !self.inner.timeout_pinned {
            self.inner
                .request_timeout_ms
                .store(router.request_timeout().as_millis() as u64, Ordering::Relaxed);
        }
        *self.inner.routing.write().await = RoutingSummary {
            default_provider: router.default_provider.clone(),
            default_model: router.default_model.clone(),
            weights: snapshot.config.weights,
            request_timeout_secs: self.request_timeout().as_secs(),
        };
    }

    /// Deadline applied to every provider call.
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.inner.request_timeout_ms.load(Ordering::Relaxed))
    }

    /// Serve a request from the first provider that can.
    ///
    /// Returns only [`HuginError::NoCandidates`] or
    /// [`HuginError::AllProvidersFailed`]; everything else is logged and
    /// absorbed by failing over.
    #[instrument(name = "hugin.generate", skip(self, request), fields(tool = %request.tool_tag))]
    pub async fn generate_response(&self, request: &CompletionRequest) -> Result<CompletionResponse> {
        if let Err(e) = self.initialize().await {
            warn!(error = %e, "router initialization failed");
            return Err(HuginError::NoCandidates);
        }

        let candidates = self
            .inner
            .selector
            .order(self.inner.registry.snapshot_all().await);
        if candidates.is_empty() {
            warn!("no provider available");
            return Err(HuginError::NoCandidates);
        }

        let mut attempts = 0;
        let mut last_err = None;
        for candidate in &candidates {
            let key = candidate.key();
            let fingerprint = Fingerprint::compute(request, key, &candidate.state.model);
            if let Some(hit) = self.inner.cache.get(&fingerprint).await {
                debug!(provider = key, %fingerprint, "cache hit");
                return Ok(hit);
            }

            attempts += 1;
            match self
                .attempt(&candidate.provider, &candidate.state, request)
                .await
            {
                Ok(response) => {
                    self.inner
                        .cache
                        .insert(fingerprint, response.clone())
                        .await;
                    self.record_usage(&candidate.state, request, &response, request.user_id.as_deref())
                        .await;
                    if attempts > 1 {
                        info!(provider = key, attempts, "served after failover");
                    }
                    return Ok(response);
                }
                Err(e) => {
                    warn!(provider = key, model = %candidate.state.model, error = %e, "provider call failed, trying next");
                    metrics::counter!(telemetry::FAILOVERS_TOTAL, "provider" => key.to_owned())
                        .increment(1);
                    last_err = Some(e);
                }
            }
        }

        Err(HuginError::AllProvidersFailed {
            attempts,
            last: Box::new(last_err.unwrap_or(HuginError::NoCandidates)),
        })
    }

    /// Call exactly one provider, bypassing the cache.
    ///
    /// Reloads the provider's credential first, requires it to be available,
    /// and folds the measured tokens-per-second into its moving average.
    #[instrument(name = "hugin.test_provider", skip(self, request))]
    pub async fn test_provider(
        &self,
        provider_key: &str,
        request: &CompletionRequest,
    ) -> Result<CompletionResponse> {
        self.initialize().await?;
        let provider = self.provider(provider_key).await?;

        let credential = self.inner.settings.credential(provider_key).await?;
        provider.set_credential(credential).await;

        let state = provider.snapshot().await;
        if !state.enabled || !state.available || state.missing_credential() {
            return Err(HuginError::ProviderUnavailable(provider_key.to_string()));
        }

        let response = self.attempt(&provider, &state, request).await?;
        if let Some(tps) = response.timing.and_then(|t| t.tokens_per_second) {
            provider.observe_tokens_per_second(tps);
        }
        self.record_usage(&state, request, &response, None).await;
        Ok(response)
    }

    /// Change a provider's model, persisting the choice.
    ///
    /// Self-hosted providers must list the model. Returns whether the model
    /// actually changed; the response cache is cleared only then.
    #[instrument(name = "hugin.update_model", skip(self))]
    pub async fn update_provider_model(&self, provider_key: &str, model: &str) -> Result<bool> {
        self.initialize().await?;
        let provider = self.provider(provider_key).await?;
        let state = provider.snapshot().await;

        if state.family == ProviderFamily::SelfHosted {
            let models = self.list_models_for(&provider, &state).await?;
            if !models.iter().any(|m| model_matches(m, model)) {
                return Err(HuginError::ModelNotFound {
                    provider: provider_key.to_string(),
                    model: model.to_string(),
                });
            }
        }

        self.inner
            .settings
            .set_model_override(provider_key, model)
            .await?;
        let changed = provider.set_model(model).await;
        if changed {
            info!(provider = provider_key, model, "model changed; clearing response cache");
            self.inner.cache.clear().await;
        }
        Ok(changed)
    }

    /// Models a provider can currently serve.
    pub async fn list_models(&self, provider_key: &str) -> Result<Vec<String>> {
        self.initialize().await?;
        let provider = self.provider(provider_key).await?;
        let state = provider.snapshot().await;
        self.list_models_for(&provider, &state).await
    }

    /// Statistics for every registered provider, credentials redacted.
    pub async fn provider_stats(&self) -> Vec<ProviderStats> {
        let mut stats = Vec::new();
        for provider in self.inner.registry.list_all().await {
            stats.push(provider.stats().await);
        }
        stats
    }

    pub async fn cache_stats(&self) -> CacheStats {
        self.inner.cache.stats().await
    }

    /// Drop every cached response.
    pub async fn clear_cache(&self) {
        self.inner.cache.clear().await;
    }

    pub async fn usage_summaries(&self) -> Result<Vec<UsageSummary>> {
        self.inner.usage.store().summaries().await
    }

    /// The latest `limit` usage records, newest last.
    pub async fn recent_usage(&self, limit: usize) -> Result<Vec<UsageRecord>> {
        self.inner.usage.store().recent(limit).await
    }

    pub async fn routing_summary(&self) -> RoutingSummary {
        self.inner.routing.read().await.clone()
    }

    async fn provider(&self, key: &str) -> Result<Arc<Provider>> {
        self.inner
            .registry
            .get(key)
            .await
            .ok_or_else(|| HuginError::UnknownProvider(key.to_string()))
    }

    async fn list_models_for(
        &self,
        provider: &Provider,
        state: &ProviderState,
    ) -> Result<Vec<String>> {
        let timeout = self.inner.prober.config().timeout_for(state.family);
        let target = state.target(provider.key());
        tokio::time::timeout(timeout, state.backend.list_models(&target))
            .await
            .map_err(|_| HuginError::Timeout(timeout))?
    }

    /// One adapter call, warm-up included, under a single request deadline.
    async fn attempt(
        &self,
        provider: &Provider,
        state: &ProviderState,
        request: &CompletionRequest,
    ) -> Result<CompletionResponse> {
        let key = provider.key();
        let target = state.target(key);
        let deadline = self.request_timeout();
        // Warm-up and call share one deadline.
        let expires = tokio::time::Instant::now() + deadline;

        if state.family == ProviderFamily::SelfHosted {
            match tokio::time::timeout_at(expires, state.backend.warm_up(&target)).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => debug!(provider = key, error = %e, "warm-up failed; calling anyway"),
                Err(_) => debug!(provider = key, "warm-up timed out; calling anyway"),
            }
        }

        let start = Instant::now();
        let result = match tokio::time::timeout_at(expires, state.backend.call(&target, request))
            .await
        {
            Ok(result) => result,
            Err(_) => Err(HuginError::Timeout(deadline)),
        };
        let elapsed = start.elapsed();
        record_request(key, elapsed, result.is_ok());

        let mut response = result?;
        let completion_tokens = response
            .usage
            .map(|u| u.completion_tokens)
            .unwrap_or_else(|| estimate_tokens(&response.content));
        response.provider_key = key.to_string();
        response.model = target.model;
        response.timing = Some(Timing::measured(elapsed, completion_tokens));
        debug!(
            provider = key,
            elapsed_ms = elapsed.as_millis() as u64,
            "provider call ok"
        );
        Ok(response)
    }

    async fn record_usage(
        &self,
        state: &ProviderState,
        request: &CompletionRequest,
        response: &CompletionResponse,
        requestor: Option<&str>,
    ) {
        let record = UsageRecorder::build_record(
            &response.provider_key,
            &state.pricing,
            &request.prompt,
            response,
            requestor,
            &request.tool_tag,
        );
        self.inner.usage.record(record).await;
    }
}

fn record_request(provider: &str, elapsed: Duration, ok: bool) {
    let status = if ok { "ok" } else { "error" };
    metrics::counter!(telemetry::REQUESTS_TOTAL,
        "provider" => provider.to_owned(),
        "status" => status,
    )
    .increment(1);
    metrics::histogram!(telemetry::REQUEST_DURATION_SECONDS,
        "provider" => provider.to_owned(),
    )
    .record(elapsed.as_secs_f64());
}
