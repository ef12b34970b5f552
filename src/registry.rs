//! Provider registry: configuration plus live state for every provider.
//!
//! Entries are created from a [`SettingsSnapshot`] and updated in place on
//! every refresh. They are never removed: a provider that disappears from the
//! configuration is disabled instead, so its key and statistics stay visible.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::config::{ProviderConfig, SettingsSnapshot};
use crate::providers::{BackendSet, CallTarget, CompletionBackend};
use crate::types::{PricingDescriptor, ProviderFamily, ProviderStats};

/// Smoothing factor for latency and throughput averages.
pub const EWMA_ALPHA: f64 = 0.3;

/// Lock-free exponentially weighted moving average.
///
/// The value is stored as `f64` bits in an `AtomicU64`; `count == 0` means
/// no data yet. Two racing first observations may both initialise the value,
/// which converges after a few more samples.
pub struct MovingAverage {
    bits: AtomicU64,
    count: AtomicU64,
    alpha: f64,
}

impl MovingAverage {
    pub fn new(alpha: f64) -> Self {
        debug_assert!((0.0..=1.0).contains(&alpha), "alpha must be in [0.0, 1.0]");
        Self {
            bits: AtomicU64::new(0_f64.to_bits()),
            count: AtomicU64::new(0),
            alpha,
        }
    }

    /// Fold one sample into the average.
    pub fn record(&self, sample: f64) {
        loop {
            let current_bits = self.bits.load(Ordering::Relaxed);
            let current = f64::from_bits(current_bits);
            let new = if self.count.load(Ordering::Relaxed) == 0 {
                sample
            } else {
                self.alpha * sample + (1.0 - self.alpha) * current
            };
            if self
                .bits
                .compare_exchange_weak(
                    current_bits,
                    new.to_bits(),
                    Ordering::Relaxed,
                    Ordering::Relaxed,
                )
                .is_ok()
            {
                self.count.fetch_add(1, Ordering::Relaxed);
                break;
            }
        }
    }

    /// Replace the average with a single baseline sample.
    pub fn reset(&self, sample: f64) {
        self.bits.store(sample.to_bits(), Ordering::Relaxed);
        self.count.store(1, Ordering::Relaxed);
    }

    /// Current average, or `None` before the first sample.
    pub fn value(&self) -> Option<f64> {
        (self.count.load(Ordering::Relaxed) > 0)
            .then(|| f64::from_bits(self.bits.load(Ordering::Relaxed)))
    }
}

impl std::fmt::Debug for MovingAverage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MovingAverage")
            .field("value", &self.value())
            .field("count", &self.count.load(Ordering::Relaxed))
            .field("alpha", &self.alpha)
            .finish()
    }
}

/// Mutable, lock-protected part of a provider.
#[derive(Clone)]
pub struct ProviderState {
    pub display_name: String,
    pub family: ProviderFamily,
    pub endpoint: String,
    pub model: String,
    pub credential: Option<String>,
    pub api_version: Option<String>,
    pub pricing: PricingDescriptor,
    pub enabled: bool,
    pub priority: Option<u32>,
    pub requires_credential: bool,
    pub available: bool,
    pub last_probed: Option<DateTime<Utc>>,
    pub backend: Arc<dyn CompletionBackend>,
}

impl std::fmt::Debug for ProviderState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderState")
            .field("display_name", &self.display_name)
            .field("family", &self.family)
            .field("endpoint", &self.endpoint)
            .field("model", &self.model)
            .field("credential", &self.credential.as_ref().map(|_| "<redacted>"))
            .field("enabled", &self.enabled)
            .field("priority", &self.priority)
            .field("available", &self.available)
            .field("backend", &self.backend.name())
            .finish()
    }
}

impl ProviderState {
    fn from_config(
        config: &ProviderConfig,
        snapshot: &SettingsSnapshot,
        backends: &BackendSet,
    ) -> Self {
        Self {
            display_name: config
                .display_name
                .clone()
                .unwrap_or_else(|| config.key.clone()),
            family: config.family,
            endpoint: config.endpoint.clone(),
            model: snapshot.model_for(config).to_string(),
            credential: snapshot.credentials.get(&config.key).cloned(),
            api_version: config.api_version.clone(),
            pricing: config.pricing.clone(),
            enabled: config.enabled,
            priority: config.priority,
            requires_credential: config.credential_required(),
            available: false,
            last_probed: None,
            backend: backends.for_provider(&config.key, config.family),
        }
    }

    /// Whether a required credential is absent.
    pub fn missing_credential(&self) -> bool {
        self.requires_credential && self.credential.is_none()
    }

    /// Call target for the adapter.
    pub fn target(&self, key: &str) -> CallTarget {
        CallTarget {
            key: key.to_string(),
            endpoint: self.endpoint.clone(),
            credential: self.credential.clone(),
            model: self.model.clone(),
            api_version: self.api_version.clone(),
        }
    }
}

/// One registered provider.
pub struct Provider {
    key: String,
    state: RwLock<ProviderState>,
    latency_ms: MovingAverage,
    tokens_per_second: MovingAverage,
}

impl std::fmt::Debug for Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Provider")
            .field("key", &self.key)
            .field("latency_ms", &self.latency_ms)
            .field("tokens_per_second", &self.tokens_per_second)
            .finish_non_exhaustive()
    }
}

impl Provider {
    fn new(key: String, state: ProviderState) -> Self {
        Self {
            key,
            state: RwLock::new(state),
            latency_ms: MovingAverage::new(EWMA_ALPHA),
            tokens_per_second: MovingAverage::new(EWMA_ALPHA),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Consistent copy of the current state.
    pub async fn snapshot(&self) -> ProviderState {
        self.state.read().await.clone()
    }

    pub async fn set_available(&self, available: bool) {
        let mut state = self.state.write().await;
        state.available = available;
        state.last_probed = Some(Utc::now());
    }

    /// Successful probe: available, with `elapsed` as the new latency baseline.
    pub async fn record_probe_success(&self, elapsed: Duration) {
        self.set_available(true).await;
        self.latency_ms.reset(elapsed.as_secs_f64() * 1000.0);
    }

    pub fn observe_tokens_per_second(&self, tps: f64) {
        self.tokens_per_second.record(tps);
    }

    pub fn avg_latency_ms(&self) -> Option<f64> {
        self.latency_ms.value()
    }

    pub fn avg_tokens_per_second(&self) -> Option<f64> {
        self.tokens_per_second.value()
    }

    /// Set the model; returns whether it changed.
    pub async fn set_model(&self, model: &str) -> bool {
        let mut state = self.state.write().await;
        if state.model == model {
            return false;
        }
        state.model = model.to_string();
        true
    }

    pub async fn set_credential(&self, credential: Option<String>) {
        self.state.write().await.credential = credential;
    }

    /// Read-only statistics with the credential reduced to a flag.
    pub async fn stats(&self) -> ProviderStats {
        let state = self.state.read().await;
        ProviderStats {
            key: self.key.clone(),
            display_name: state.display_name.clone(),
            family: state.family,
            endpoint: state.endpoint.clone(),
            model: state.model.clone(),
            enabled: state.enabled,
            available: state.available,
            priority: state.priority,
            has_credential: state.credential.is_some(),
            avg_latency_ms: self.avg_latency_ms(),
            avg_tokens_per_second: self.avg_tokens_per_second(),
            last_probed: state.last_probed,
            pricing: state.pricing.clone(),
        }
    }

    async fn apply_config(
        &self,
        config: &ProviderConfig,
        snapshot: &SettingsSnapshot,
        backends: &BackendSet,
    ) {
        let fresh = ProviderState::from_config(config, snapshot, backends);
        let mut state = self.state.write().await;
        if state.model != fresh.model {
            info!(provider = %self.key, from = %state.model, to = %fresh.model, "model changed on refresh");
        }
        *state = ProviderState {
            available: state.available,
            last_probed: state.last_probed,
            ..fresh
        };
    }
}

/// Registry of all known providers in configuration order.
#[derive(Default)]
pub struct ProviderRegistry {
    providers: RwLock<Vec<Arc<Provider>>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bring the registry in line with `snapshot`.
    ///
    /// Existing entries are updated in place and keep their live state. New
    /// enabled entries are appended as unavailable until probed. Entries no
    /// longer configured are disabled, never dropped.
    pub async fn sync(&self, snapshot: &SettingsSnapshot, backends: &BackendSet) {
        let mut providers = self.providers.write().await;

        for existing in providers.iter() {
            match snapshot
                .config
                .providers
                .iter()
                .find(|c| c.key == existing.key)
            {
                Some(config) => existing.apply_config(config, snapshot, backends).await,
                None => {
                    let mut state = existing.state.write().await;
                    if state.enabled {
                        info!(provider = %existing.key, "provider removed from configuration, disabling");
                    }
                    state.enabled = false;
                }
            }
        }

        for config in &snapshot.config.providers {
            if !config.enabled || providers.iter().any(|p| p.key == config.key) {
                continue;
            }
            let state = ProviderState::from_config(config, snapshot, backends);
            if state.missing_credential() {
                info!(provider = %config.key, "registered without credential; ineligible until refreshed");
            }
            debug!(provider = %config.key, family = %config.family, "registering provider");
            providers.push(Arc::new(Provider::new(config.key.clone(), state)));
        }
    }

    pub async fn get(&self, key: &str) -> Option<Arc<Provider>> {
        self.providers
            .read()
            .await
            .iter()
            .find(|p| p.key == key)
            .cloned()
    }

    /// All providers in registry order.
    pub async fn list_all(&self) -> Vec<Arc<Provider>> {
        self.providers.read().await.clone()
    }

    /// Every provider paired with a copy of its state, in registry order.
    pub async fn snapshot_all(&self) -> Vec<(Arc<Provider>, ProviderState)> {
        let providers = self.list_all().await;
        let mut out = Vec::with_capacity(providers.len());
        for provider in providers {
            let state = provider.snapshot().await;
            out.push((provider, state));
        }
        out
    }

    pub async fn len(&self) -> usize {
        self.providers.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.providers.read().await.is_empty()
    }
}
