//! Integration tests for the request dispatcher.
//!
//! Providers are backed by in-process mock adapters so each test controls
//! exactly which calls succeed, fail or hang, and can count network calls.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::future::join_all;
use serde_json::json;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use hugin::{
    CacheConfig, CallTarget, CompletionBackend, CompletionRequest, CompletionResponse, HuginError,
    MemorySettingsStore, MemoryUsageStore, PricingDescriptor, ProbeReport, ProviderConfig,
    ProviderFamily, Result, RetryConfig, Router, RouterConfig, SettingsStore, Usage, UsageRecord,
    UsageStore, UsageSummary,
};

// ============================================================================
// Mock backends
// ============================================================================

enum Behavior {
    Reply(&'static str),
    Fail(&'static str),
    Hang,
}

struct MockBackend {
    behavior: Behavior,
    models: Vec<String>,
    probe_ok: bool,
    delay: Duration,
    calls: AtomicU32,
    probes: AtomicU32,
}

impl MockBackend {
    fn new(behavior: Behavior) -> Self {
        Self {
            behavior,
            models: vec!["m".to_string()],
            probe_ok: true,
            delay: Duration::ZERO,
            calls: AtomicU32::new(0),
            probes: AtomicU32::new(0),
        }
    }

    fn replying(content: &'static str) -> Arc<Self> {
        Arc::new(Self::new(Behavior::Reply(content)))
    }

    fn failing(message: &'static str) -> Arc<Self> {
        Arc::new(Self::new(Behavior::Fail(message)))
    }

    fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CompletionBackend for MockBackend {
    fn name(&self) -> &str {
        "mock"
    }

    async fn call(
        &self,
        target: &CallTarget,
        request: &CompletionRequest,
    ) -> Result<CompletionResponse> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        match self.behavior {
            Behavior::Reply(content) => Ok(CompletionResponse {
                content: format!("{content} [{}:{}] {}", target.key, target.model, request.prompt),
                usage: Some(Usage::new(1000, 500)),
                ..Default::default()
            }),
            Behavior::Fail(message) => Err(HuginError::Api {
                status: 500,
                message: message.to_string(),
            }),
            Behavior::Hang => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Err(HuginError::Http("unreachable".into()))
            }
        }
    }

    async fn health_check(&self, _target: &CallTarget) -> Result<ProbeReport> {
        self.probes.fetch_add(1, Ordering::SeqCst);
        if self.probe_ok {
            Ok(ProbeReport {
                models: self.models.clone(),
            })
        } else {
            Err(HuginError::Http("connection refused".into()))
        }
    }
}

/// Usage store that always fails.
struct BrokenUsageStore;

#[async_trait]
impl UsageStore for BrokenUsageStore {
    async fn append(&self, _record: &UsageRecord) -> Result<()> {
        Err(HuginError::Storage("disk full".into()))
    }

    async fn summaries(&self) -> Result<Vec<UsageSummary>> {
        Ok(Vec::new())
    }

    async fn recent(&self, _limit: usize) -> Result<Vec<UsageRecord>> {
        Ok(Vec::new())
    }
}

// ============================================================================
// Helpers
// ============================================================================

fn local(key: &str, priority: u32) -> ProviderConfig {
    ProviderConfig::new(key, ProviderFamily::SelfHosted, "http://unused", "m").priority(priority)
}

fn hosted(key: &str, priority: u32) -> ProviderConfig {
    ProviderConfig::new(key, ProviderFamily::ChatCompletions, "http://unused", "m")
        .priority(priority)
        .pricing(PricingDescriptor::InputOutput {
            input_cost_per_1k: 1.0,
            output_cost_per_1k: 2.0,
            models: Default::default(),
        })
}

fn config(providers: Vec<ProviderConfig>) -> RouterConfig {
    RouterConfig {
        providers,
        ..Default::default()
    }
}

fn router(
    settings: Arc<MemorySettingsStore>,
    backends: Vec<(&str, Arc<MockBackend>)>,
) -> Router {
    let mut builder = Router::builder().settings(settings);
    for (key, backend) in backends {
        builder = builder.backend(key, backend);
    }
    builder.build().unwrap()
}

fn ping() -> CompletionRequest {
    CompletionRequest::new("ping").user("u1").tool("chat")
}

async fn stats_for(router: &Router, key: &str) -> hugin::ProviderStats {
    router
        .provider_stats()
        .await
        .into_iter()
        .find(|s| s.key == key)
        .unwrap()
}

// ============================================================================
// Ordering and failover
// ============================================================================

#[tokio::test]
async fn first_attempt_targets_highest_priority() {
    let a = MockBackend::replying("from a");
    let b = MockBackend::replying("from b");
    let settings = Arc::new(MemorySettingsStore::new(config(vec![
        local("b", 2),
        local("a", 1),
    ])));
    let router = router(settings, vec![("a", a.clone()), ("b", b.clone())]);

    let response = router.generate_response(&ping()).await.unwrap();
    assert_eq!(response.provider_key, "a");
    assert_eq!(a.calls(), 1);
    assert_eq!(b.calls(), 0);
}

#[tokio::test]
async fn failover_moves_to_next_provider_without_disabling() {
    let a = MockBackend::failing("a exploded");
    let b = MockBackend::replying("from b");
    let settings = Arc::new(MemorySettingsStore::new(config(vec![
        local("a", 1),
        local("b", 2),
    ])));
    let router = router(settings, vec![("a", a.clone()), ("b", b.clone())]);

    let response = router.generate_response(&ping()).await.unwrap();
    assert_eq!(response.provider_key, "b");
    assert_eq!(a.calls(), 1);
    assert!(stats_for(&router, "a").await.available);
}

#[tokio::test]
async fn exhaustion_reports_last_error() {
    let a = MockBackend::failing("a exploded");
    let b = MockBackend::failing("b exploded");
    let settings = Arc::new(MemorySettingsStore::new(config(vec![
        local("a", 1),
        local("b", 2),
    ])));
    let router = router(settings, vec![("a", a), ("b", b)]);

    let err = router.generate_response(&ping()).await.unwrap_err();
    match &err {
        HuginError::AllProvidersFailed { attempts, .. } => assert_eq!(*attempts, 2),
        other => panic!("expected AllProvidersFailed, got {other:?}"),
    }
    assert!(err.to_string().contains("b exploded"));
    assert!(err.is_boundary());
}

#[tokio::test]
async fn local_timeout_falls_back_to_hosted() {
    let local_backend = Arc::new(MockBackend::new(Behavior::Hang));
    let hosted_backend = MockBackend::replying("from hosted");
    let settings = Arc::new(MemorySettingsStore::new(config(vec![
        local("local", 1),
        hosted("hosted", 2),
    ])));
    settings.set_credential("hosted", "sk-test").await;
    let router = Router::builder()
        .settings(settings)
        .backend("local", local_backend.clone())
        .backend("hosted", hosted_backend.clone())
        .request_timeout(Duration::from_millis(50))
        .build()
        .unwrap();

    let response = router
        .generate_response(&CompletionRequest::new("ping"))
        .await
        .unwrap();
    assert_eq!(response.provider_key, "hosted");
    assert_eq!(local_backend.calls(), 1);
    assert_eq!(hosted_backend.calls(), 1);
}

#[tokio::test]
async fn warm_up_and_call_share_one_deadline() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/tags"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"models": [{"name": "m"}]})))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/ps"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"models": []}))
                .set_delay(Duration::from_millis(250)),
        )
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/generate"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"response": "late"}))
                .set_delay(Duration::from_millis(250)),
        )
        .mount(&server)
        .await;

    let settings = Arc::new(MemorySettingsStore::new(config(vec![
        ProviderConfig::new("local", ProviderFamily::SelfHosted, server.uri(), "m").priority(1),
    ])));
    let router = Router::builder()
        .settings(settings)
        .request_timeout(Duration::from_millis(300))
        .self_hosted_retry(RetryConfig::disabled())
        .build()
        .unwrap();
    router.initialize().await.unwrap();

    let started = std::time::Instant::now();
    let err = router.generate_response(&ping()).await.unwrap_err();
    let elapsed = started.elapsed();

    assert!(matches!(err, HuginError::AllProvidersFailed { .. }));
    assert!(err.to_string().contains("timed out"), "{err}");
    assert!(elapsed < Duration::from_millis(450), "took {elapsed:?}");
}

#[tokio::test]
async fn no_providers_is_no_candidates() {
    let settings = Arc::new(MemorySettingsStore::new(RouterConfig::default()));
    let router = router(settings, vec![]);
    let err = router.generate_response(&ping()).await.unwrap_err();
    assert!(matches!(err, HuginError::NoCandidates));
}

#[tokio::test]
async fn failed_probes_leave_no_candidates() {
    let a = Arc::new(MockBackend {
        probe_ok: false,
        ..MockBackend::new(Behavior::Reply("never"))
    });
    let settings = Arc::new(MemorySettingsStore::new(config(vec![local("a", 1)])));
    let router = router(settings, vec![("a", a.clone())]);

    let err = router.generate_response(&ping()).await.unwrap_err();
    assert!(matches!(err, HuginError::NoCandidates));
    assert_eq!(a.calls(), 0);
}

// ============================================================================
// Credentials and refresh
// ============================================================================

#[tokio::test]
async fn missing_credential_registers_but_is_ineligible() {
    let backend = MockBackend::replying("from hosted");
    let settings = Arc::new(MemorySettingsStore::new(config(vec![hosted("hosted", 1)])));
    let router = router(settings.clone(), vec![("hosted", backend.clone())]);

    let err = router.generate_response(&ping()).await.unwrap_err();
    assert!(matches!(err, HuginError::NoCandidates));
    let stats = stats_for(&router, "hosted").await;
    assert!(!stats.available);
    assert!(!stats.has_credential);
    assert_eq!(backend.probes.load(Ordering::SeqCst), 0);

    settings.set_credential("hosted", "sk-test").await;
    let summary = router.refresh_providers().await.unwrap();
    assert_eq!(summary.available, vec!["hosted".to_string()]);

    let response = router.generate_response(&ping()).await.unwrap();
    assert_eq!(response.provider_key, "hosted");
}

#[tokio::test]
async fn refresh_disables_removed_providers_without_dropping_them() {
    let a = MockBackend::replying("from a");
    let b = MockBackend::replying("from b");
    let settings = Arc::new(MemorySettingsStore::new(config(vec![
        local("a", 1),
        local("b", 2),
    ])));
    let router = router(settings.clone(), vec![("a", a), ("b", b)]);
    router.initialize().await.unwrap();

    settings.set_config(config(vec![local("b", 2)])).await;
    router.refresh_providers().await.unwrap();

    let stats = router.provider_stats().await;
    assert_eq!(stats.len(), 2);
    let a_stats = stats.iter().find(|s| s.key == "a").unwrap();
    assert!(!a_stats.enabled);
    assert!(!a_stats.available);

    let response = router.generate_response(&ping()).await.unwrap();
    assert_eq!(response.provider_key, "b");
}

#[tokio::test]
async fn concurrent_first_calls_initialize_once() {
    let a = MockBackend::replying("from a");
    let settings = Arc::new(MemorySettingsStore::new(config(vec![local("a", 1)])));
    let router = router(settings, vec![("a", a.clone())]);

    let requests: Vec<_> = (0..10)
        .map(|i| CompletionRequest::new(format!("prompt {i}")))
        .collect();
    let results = join_all(requests.iter().map(|r| router.generate_response(r))).await;

    assert!(results.iter().all(|r| r.is_ok()));
    assert_eq!(a.probes.load(Ordering::SeqCst), 1);
    assert!(router.is_initialized());
}

#[tokio::test]
async fn wait_until_probed_resolves_after_initialize() {
    let a = MockBackend::replying("from a");
    let settings = Arc::new(MemorySettingsStore::new(config(vec![local("a", 1)])));
    let router = router(settings, vec![("a", a)]);

    let waiter = {
        let router = router.clone();
        tokio::spawn(async move { router.wait_until_probed().await })
    };
    router.initialize().await.unwrap();
    tokio::time::timeout(Duration::from_secs(1), waiter)
        .await
        .expect("waiter should finish")
        .unwrap();
}

// ============================================================================
// Cache
// ============================================================================

#[tokio::test]
async fn identical_request_is_served_from_cache() {
    let a = MockBackend::replying("from a");
    let usage = Arc::new(MemoryUsageStore::new());
    let router = Router::builder()
        .settings(Arc::new(MemorySettingsStore::new(config(vec![local("a", 1)]))))
        .backend("a", a.clone())
        .usage_store(usage.clone())
        .build()
        .unwrap();

    let first = router.generate_response(&ping()).await.unwrap();
    let second = router.generate_response(&ping()).await.unwrap();

    assert_eq!(first.content, second.content);
    assert_eq!(a.calls(), 1);
    assert_eq!(usage.recent(10).await.unwrap().len(), 1);
    let stats = router.cache_stats().await;
    assert_eq!(stats.hits, 1);
    assert_eq!(stats.entries, 1);
}

#[tokio::test]
async fn different_user_misses_cache() {
    let a = MockBackend::replying("from a");
    let settings = Arc::new(MemorySettingsStore::new(config(vec![local("a", 1)])));
    let router = router(settings, vec![("a", a.clone())]);

    router.generate_response(&ping()).await.unwrap();
    router.generate_response(&ping().user("u2")).await.unwrap();
    assert_eq!(a.calls(), 2);
}

#[tokio::test]
async fn expired_entry_is_not_served() {
    let a = MockBackend::replying("from a");
    let router = Router::builder()
        .settings(Arc::new(MemorySettingsStore::new(config(vec![local("a", 1)]))))
        .backend("a", a.clone())
        .cache(CacheConfig::new().ttl(Duration::from_millis(50)))
        .build()
        .unwrap();

    router.generate_response(&ping()).await.unwrap();
    tokio::time::sleep(Duration::from_millis(150)).await;
    router.generate_response(&ping()).await.unwrap();
    assert_eq!(a.calls(), 2);
}

#[tokio::test]
async fn model_change_isolates_and_clears_cache() {
    let a = Arc::new(MockBackend {
        models: vec!["m".into(), "m2".into()],
        ..MockBackend::new(Behavior::Reply("from a"))
    });
    let settings = Arc::new(MemorySettingsStore::new(config(vec![local("a", 1)])));
    let router = router(settings.clone(), vec![("a", a.clone())]);

    let before = router.generate_response(&ping()).await.unwrap();
    assert_eq!(before.model, "m");

    assert!(router.update_provider_model("a", "m2").await.unwrap());
    assert_eq!(router.cache_stats().await.entries, 0);

    let after = router.generate_response(&ping()).await.unwrap();
    assert_eq!(after.model, "m2");
    assert_ne!(before.content, after.content);
    assert_eq!(a.calls(), 2);

    // Same model again: no change, persisted override untouched.
    assert!(!router.update_provider_model("a", "m2").await.unwrap());
    assert_eq!(router.cache_stats().await.entries, 1);
    let snapshot = settings.snapshot().await.unwrap();
    assert_eq!(snapshot.model_overrides["a"], "m2");
}

#[tokio::test]
async fn self_hosted_model_must_exist() {
    let a = MockBackend::replying("from a");
    let settings = Arc::new(MemorySettingsStore::new(config(vec![local("a", 1)])));
    let router = router(settings, vec![("a", a)]);

    let err = router
        .update_provider_model("a", "does-not-exist")
        .await
        .unwrap_err();
    assert!(matches!(err, HuginError::ModelNotFound { .. }));
    assert_eq!(stats_for(&router, "a").await.model, "m");
}

#[tokio::test]
async fn update_model_unknown_provider() {
    let settings = Arc::new(MemorySettingsStore::new(config(vec![local("a", 1)])));
    let router = router(settings, vec![("a", MockBackend::replying("x"))]);
    let err = router.update_provider_model("nope", "m").await.unwrap_err();
    assert!(matches!(err, HuginError::UnknownProvider(_)));
}

// ============================================================================
// Usage
// ============================================================================

#[tokio::test]
async fn usage_recorded_with_cost_and_requestor() {
    let backend = MockBackend::replying("from hosted");
    let usage = Arc::new(MemoryUsageStore::new());
    let settings = Arc::new(MemorySettingsStore::new(config(vec![hosted("hosted", 1)])));
    settings.set_credential("hosted", "sk-test").await;
    let router = Router::builder()
        .settings(settings)
        .backend("hosted", backend)
        .usage_store(usage)
        .build()
        .unwrap();

    router.generate_response(&ping()).await.unwrap();

    let records = router.recent_usage(10).await.unwrap();
    assert_eq!(records.len(), 1);
    let record = &records[0];
    assert_eq!(record.provider_key, "hosted");
    assert_eq!(record.requestor.as_deref(), Some("u1"));
    assert_eq!(record.tool_tag, "chat");
    assert!((record.total_cost - 2.0).abs() < 1e-9);

    let summaries = router.usage_summaries().await.unwrap();
    assert_eq!(summaries.len(), 1);
    assert_eq!(summaries[0].request_count, 1);
    assert_eq!(summaries[0].total_tokens, 1500);
}

#[tokio::test]
async fn usage_failure_does_not_fail_request() {
    let a = MockBackend::replying("from a");
    let router = Router::builder()
        .settings(Arc::new(MemorySettingsStore::new(config(vec![local("a", 1)]))))
        .backend("a", a)
        .usage_store(Arc::new(BrokenUsageStore))
        .build()
        .unwrap();

    let response = router.generate_response(&ping()).await.unwrap();
    assert_eq!(response.provider_key, "a");
}

// ============================================================================
// test_provider
// ============================================================================

#[tokio::test]
async fn test_provider_bypasses_cache_and_tracks_throughput() {
    let a = Arc::new(MockBackend {
        delay: Duration::from_millis(20),
        ..MockBackend::new(Behavior::Reply("from a"))
    });
    let b = MockBackend::replying("from b");
    let usage = Arc::new(MemoryUsageStore::new());
    let router = Router::builder()
        .settings(Arc::new(MemorySettingsStore::new(config(vec![
            local("a", 1),
            local("b", 2),
        ]))))
        .backend("a", a.clone())
        .backend("b", b.clone())
        .usage_store(usage)
        .build()
        .unwrap();

    let first = router.test_provider("b", &ping()).await.unwrap();
    router.test_provider("b", &ping()).await.unwrap();
    assert_eq!(first.provider_key, "b");
    assert_eq!(b.calls(), 2);
    assert_eq!(router.cache_stats().await.entries, 0);

    router.test_provider("a", &ping()).await.unwrap();
    let stats = stats_for(&router, "a").await;
    let tps = stats.avg_tokens_per_second.unwrap();
    assert!(tps > 0.0);

    let records = router.recent_usage(10).await.unwrap();
    assert_eq!(records.len(), 3);
    assert!(records.iter().all(|r| r.requestor.is_none()));
}

#[tokio::test]
async fn test_provider_requires_availability() {
    let a = Arc::new(MockBackend {
        probe_ok: false,
        ..MockBackend::new(Behavior::Reply("from a"))
    });
    let settings = Arc::new(MemorySettingsStore::new(config(vec![local("a", 1)])));
    let router = router(settings, vec![("a", a.clone())]);

    let err = router.test_provider("a", &ping()).await.unwrap_err();
    assert!(matches!(err, HuginError::ProviderUnavailable(_)));
    assert_eq!(a.calls(), 0);

    let err = router.test_provider("missing", &ping()).await.unwrap_err();
    assert!(matches!(err, HuginError::UnknownProvider(_)));
}

#[tokio::test]
async fn test_provider_reloads_credential_just_in_time() {
    let backend = MockBackend::replying("from hosted");
    let settings = Arc::new(MemorySettingsStore::new(config(vec![hosted("hosted", 1)])));
    settings.set_credential("hosted", "sk-test").await;
    let router = router(settings.clone(), vec![("hosted", backend.clone())]);
    router.initialize().await.unwrap();

    settings.remove_credential("hosted").await;
    let err = router.test_provider("hosted", &ping()).await.unwrap_err();
    assert!(matches!(err, HuginError::ProviderUnavailable(_)));
    assert_eq!(backend.calls(), 0);
    assert!(!stats_for(&router, "hosted").await.has_credential);
}

// ============================================================================
// Introspection
// ============================================================================

#[tokio::test]
async fn routing_summary_reports_configured_defaults() {
    let mut cfg = config(vec![local("a", 1)]);
    cfg.router.default_provider = Some("a".into());
    cfg.weights.latency = 0.6;
    let router = router(
        Arc::new(MemorySettingsStore::new(cfg)),
        vec![("a", MockBackend::replying("x"))],
    );
    router.initialize().await.unwrap();

    let summary = router.routing_summary().await;
    assert_eq!(summary.default_provider.as_deref(), Some("a"));
    assert_eq!(summary.weights.latency, 0.6);
    assert_eq!(summary.request_timeout_secs, 120);
}

#[tokio::test]
async fn provider_stats_carry_probe_latency() {
    let router = router(
        Arc::new(MemorySettingsStore::new(config(vec![local("a", 1)]))),
        vec![("a", MockBackend::replying("x"))],
    );
    router.initialize().await.unwrap();
    let stats = stats_for(&router, "a").await;
    assert!(stats.available);
    assert!(stats.avg_latency_ms.is_some());
    assert!(stats.last_probed.is_some());
    assert_eq!(stats.priority, Some(1));
}

#[tokio::test]
async fn dispatch_leaves_latency_average_untouched() {
    let slow = Arc::new(MockBackend {
        delay: Duration::from_millis(100),
        ..MockBackend::new(Behavior::Reply("x"))
    });
    let router = router(
        Arc::new(MemorySettingsStore::new(config(vec![local("a", 1)]))),
        vec![("a", slow.clone())],
    );
    router.initialize().await.unwrap();
    let before = stats_for(&router, "a").await.avg_latency_ms;
    assert!(before.is_some());

    router.generate_response(&ping()).await.unwrap();
    assert_eq!(slow.calls(), 1);
    assert_eq!(stats_for(&router, "a").await.avg_latency_ms, before);
}
