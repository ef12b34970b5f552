//! Builder for configuring router instances

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::AtomicU64;
use std::time::Duration;

use tokio::sync::{OnceCell, RwLock};

use super::{Router, RouterInner, RoutingSummary};
use crate::cache::{CacheConfig, ResponseCache};
use crate::config::{MemorySettingsStore, RouterConfig, SettingsStore};
use crate::health::{HealthProber, ProbeConfig};
use crate::providers::{BackendSet, CompletionBackend, RetryConfig};
use crate::selector::PrioritySelector;
use crate::usage::{MemoryUsageStore, UsageRecorder, UsageStore};
use crate::{HuginError, Result};

/// Builder for [`Router`].
///
/// Either [`settings`](Self::settings) or [`config`](Self::config) is
/// required. When a config is given, its `[cache]`, `[probe]` and `[router]`
/// sections provide defaults for anything not set explicitly.
///
/// ```rust,no_run
/// # use hugin::{Router, RouterConfig};
/// # fn example(config: RouterConfig) -> hugin::Result<()> {
/// let router = Router::builder().config(config).build()?;
/// # Ok(())
/// # }
/// ```
#[derive(Default)]
pub struct RouterBuilder {
    settings: Option<Arc<dyn SettingsStore>>,
    config: Option<RouterConfig>,
    backends: HashMap<String, Arc<dyn CompletionBackend>>,
    usage_store: Option<Arc<dyn UsageStore>>,
    cache: Option<CacheConfig>,
    probe: Option<ProbeConfig>,
    request_timeout: Option<Duration>,
    self_hosted_retry: Option<RetryConfig>,
    http_client: Option<reqwest::Client>,
}

impl RouterBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read providers, credentials and model choices from this store.
    pub fn settings(mut self, settings: Arc<dyn SettingsStore>) -> Self {
        self.settings = Some(settings);
        self
    }

    /// Static configuration. Used as the settings store when none is given.
    pub fn config(mut self, config: RouterConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Use a specific adapter for one provider key.
    pub fn backend(mut self, provider_key: impl Into<String>, backend: Arc<dyn CompletionBackend>) -> Self {
        self.backends.insert(provider_key.into(), backend);
        self
    }

    /// Where usage records go. Default: in memory.
    pub fn usage_store(mut self, store: Arc<dyn UsageStore>) -> Self {
        self.usage_store = Some(store);
        self
    }

    pub fn cache(mut self, config: CacheConfig) -> Self {
        self.cache = Some(config);
        self
    }

    pub fn probe(mut self, config: ProbeConfig) -> Self {
        self.probe = Some(config);
        self
    }

    /// Per-call deadline. Overrides `[router] request_timeout_secs`.
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    /// Retry policy inside the self-hosted adapter.
    pub fn self_hosted_retry(mut self, retry: RetryConfig) -> Self {
        self.self_hosted_retry = Some(retry);
        self
    }

    pub fn http_client(mut self, client: reqwest::Client) -> Self {
        self.http_client = Some(client);
        self
    }

    /// Build the router. No I/O happens until the first call.
    pub fn build(self) -> Result<Router> {
        let defaults = self.config.clone().unwrap_or_default();
        let settings: Arc<dyn SettingsStore> = match (self.settings, self.config) {
            (Some(settings), _) => settings,
            (None, Some(config)) => Arc::new(MemorySettingsStore::new(config)),
            (None, None) => {
                return Err(HuginError::Configuration(
                    "router needs a settings store or a config".to_string(),
                ));
            }
        };

        let client = match self.http_client {
            Some(client) => client,
            None => reqwest::Client::builder()
                .user_agent(concat!("hugin/", env!("CARGO_PKG_VERSION")))
                .build()
                .map_err(|e| HuginError::Configuration(format!("failed to build HTTP client: {e}")))?,
        };
        let mut backends = BackendSet::new(client, self.self_hosted_retry.unwrap_or_default());
        for (key, backend) in self.backends {
            backends = backends.with_override(key, backend);
        }

        let cache = self.cache.unwrap_or_else(|| defaults.cache.clone().into());
        let probe = self.probe.unwrap_or_else(|| defaults.probe.clone().into());
        let timeout_pinned = self.request_timeout.is_some();
        let request_timeout = self
            .request_timeout
            .unwrap_or_else(|| defaults.router.request_timeout());
        let usage_store = self
            .usage_store
            .unwrap_or_else(|| Arc::new(MemoryUsageStore::new()));

        Ok(Router {
            inner: Arc::new(RouterInner {
                settings,
                registry: Default::default(),
                backends,
                prober: HealthProber::new(probe),
                selector: PrioritySelector::new(),
                cache: ResponseCache::new(&cache),
                usage: UsageRecorder::new(usage_store),
                request_timeout_ms: AtomicU64::new(request_timeout.as_millis() as u64),
                timeout_pinned,
                routing: RwLock::new(RoutingSummary {
                    request_timeout_secs: request_timeout.as_secs(),
                    ..Default::default()
                }),
                init: OnceCell::new(),
            }),
        })
    }
}
