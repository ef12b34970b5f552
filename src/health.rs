//! Health prober: availability and baseline latency per provider.
//!
//! Each probe round checks every registered provider concurrently under a
//! family-specific timeout. A failing or hanging provider only affects its
//! own availability flag. Completed rounds are published on a
//! [`tokio::sync::watch`] channel so callers can await readiness instead of
//! polling.

use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::future::join_all;
use serde::Serialize;
use tokio::sync::watch;
use tracing::{debug, info, instrument, warn};

use crate::HuginError;
use crate::providers::self_hosted::model_matches;
use crate::registry::{Provider, ProviderRegistry};
use crate::telemetry;
use crate::types::ProviderFamily;

/// Probe timeouts per family.
///
/// ```rust
/// # use hugin::ProbeConfig;
/// # use std::time::Duration;
/// let config = ProbeConfig::new().self_hosted_timeout(Duration::from_secs(2));
/// ```
#[derive(Debug, Clone)]
pub struct ProbeConfig {
    /// Default: 5s.
    pub self_hosted_timeout: Duration,
    /// Default: 10s.
    pub hosted_timeout: Duration,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            self_hosted_timeout: ProviderFamily::SelfHosted.default_probe_timeout(),
            hosted_timeout: ProviderFamily::ChatCompletions.default_probe_timeout(),
        }
    }
}

impl ProbeConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn self_hosted_timeout(mut self, timeout: Duration) -> Self {
        self.self_hosted_timeout = timeout;
        self
    }

    pub fn hosted_timeout(mut self, timeout: Duration) -> Self {
        self.hosted_timeout = timeout;
        self
    }

    pub fn timeout_for(&self, family: ProviderFamily) -> Duration {
        match family {
            ProviderFamily::SelfHosted => self.self_hosted_timeout,
            ProviderFamily::ChatCompletions | ProviderFamily::Messages => self.hosted_timeout,
        }
    }
}

/// Result of one probe round.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ProbeSummary {
    pub available: Vec<String>,
    pub unavailable: Vec<String>,
}

/// Receiver side of the probe completion signal.
///
/// Carries the number of completed probe rounds.
pub type ProbeSignal = watch::Receiver<u64>;

/// Runs probe rounds against a registry.
pub struct HealthProber {
    config: ProbeConfig,
    rounds: watch::Sender<u64>,
}

impl HealthProber {
    pub fn new(config: ProbeConfig) -> Self {
        let (rounds, _) = watch::channel(0);
        Self { config, rounds }
    }

    pub fn config(&self) -> &ProbeConfig {
        &self.config
    }

    /// Subscribe to probe round completions.
    pub fn subscribe(&self) -> ProbeSignal {
        self.rounds.subscribe()
    }

    /// Number of completed probe rounds.
    pub fn completed_rounds(&self) -> u64 {
        *self.rounds.borrow()
    }

    /// Probe every registered provider. Never fails.
    #[instrument(name = "hugin.probe_all", skip_all)]
    pub async fn probe_all(&self, registry: &ProviderRegistry) -> ProbeSummary {
        let providers = registry.list_all().await;
        let outcomes = join_all(providers.iter().map(|p| self.probe_one(p))).await;

        let mut summary = ProbeSummary::default();
        for (provider, available) in providers.iter().zip(outcomes) {
            if available {
                summary.available.push(provider.key().to_string());
            } else {
                summary.unavailable.push(provider.key().to_string());
            }
        }
        self.rounds.send_modify(|n| *n += 1);
        info!(
            available = summary.available.len(),
            unavailable = summary.unavailable.len(),
            "probe round complete"
        );
        summary
    }

    /// Probe a single provider and update its state. Returns availability.
    pub async fn probe_one(&self, provider: &Arc<Provider>) -> bool {
        let key = provider.key();
        let state = provider.snapshot().await;

        if !state.enabled {
            debug!(provider = key, "skipping probe for disabled provider");
            provider.set_available(false).await;
            return false;
        }
        if state.missing_credential() {
            warn!(provider = key, "credential missing; marking unavailable");
            provider.set_available(false).await;
            record_probe(key, false);
            return false;
        }

        let timeout = self.config.timeout_for(state.family);
        let target = state.target(key);
        let start = Instant::now();
        let outcome = match tokio::time::timeout(timeout, state.backend.health_check(&target)).await
        {
            Ok(result) => result,
            Err(_) => Err(HuginError::Timeout(timeout)),
        };
        let elapsed = start.elapsed();

        let report = match outcome {
            Ok(report) => report,
            Err(e) => {
                warn!(provider = key, error = %e, "probe failed");
                provider.set_available(false).await;
                record_probe(key, false);
                return false;
            }
        };

        if state.family == ProviderFamily::SelfHosted {
            let Some(first) = report.models.first() else {
                warn!(provider = key, "self-hosted server reports no models");
                provider.set_available(false).await;
                record_probe(key, false);
                return false;
            };
            if !report.models.iter().any(|m| model_matches(m, &state.model)) {
                info!(
                    provider = key,
                    configured = %state.model,
                    substitute = %first,
                    "configured model not on server; using first available model"
                );
                provider.set_model(first).await;
            }
        }

        provider.record_probe_success(elapsed).await;
        record_probe(key, true);
        debug!(provider = key, elapsed_ms = elapsed.as_millis() as u64, "probe ok");
        true
    }
}

fn record_probe(provider: &str, ok: bool) {
    metrics::counter!(
        telemetry::PROBES_TOTAL,
        "provider" => provider.to_owned(),
        "status" => if ok { "ok" } else { "error" },
    )
    .increment(1);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeouts_by_family() {
        let config = ProbeConfig::default();
        assert_eq!(
            config.timeout_for(ProviderFamily::SelfHosted),
            Duration::from_secs(5)
        );
        assert_eq!(
            config.timeout_for(ProviderFamily::Messages),
            Duration::from_secs(10)
        );
    }

    #[tokio::test]
    async fn empty_round_still_signals() {
        let prober = HealthProber::new(ProbeConfig::default());
        let mut signal = prober.subscribe();
        let summary = prober.probe_all(&ProviderRegistry::new()).await;
        assert_eq!(summary, ProbeSummary::default());
        signal.changed().await.unwrap();
        assert_eq!(*signal.borrow(), 1);
        assert_eq!(prober.completed_rounds(), 1);
    }
}
