//! Hugin - multi-backend completion router
//!
//! Routes content-generation requests across a self-hosted model server and
//! hosted completion APIs. Providers are tried in configured priority order,
//! failing over on error, with health probing, a bounded response cache and
//! per-provider usage/cost accounting.
//!
//! # Example
//!
//! ```rust,no_run
//! use hugin::{CompletionRequest, Router, RouterConfig};
//!
//! #[tokio::main]
//! async fn main() -> hugin::Result<()> {
//!     let config = RouterConfig::load(None)?;
//!     let router = Router::builder().config(config).build()?;
//!     router.initialize().await?;
//!
//!     let response = router
//!         .generate_response(
//!             &CompletionRequest::new("Suggest a high-protein breakfast")
//!                 .user("user-1")
//!                 .tool("meal-ideas"),
//!         )
//!         .await?;
//!
//!     println!("[{}] {}", response.provider_key, response.content);
//!     Ok(())
//! }
//! ```

pub mod cache;
pub mod config;
pub mod error;
pub mod health;
pub mod providers;
pub mod registry;
pub mod router;
pub mod selector;
pub mod telemetry;
pub mod types;
pub mod usage;

// Re-export main types at crate root
pub use cache::{CacheConfig, CacheStats, Fingerprint, ResponseCache};
pub use config::{
    FileSettingsStore, MemorySettingsStore, ProviderConfig, RouterConfig, Secrets,
    SettingsSnapshot, SettingsStore, WeightsConfig,
};
pub use error::{HuginError, Result};
pub use health::{HealthProber, ProbeConfig, ProbeSignal, ProbeSummary};
pub use providers::{CallTarget, CompletionBackend, ProbeReport, RetryConfig};
pub use registry::{Provider, ProviderRegistry, ProviderState};
pub use router::{Router, RouterBuilder, RoutingSummary};
pub use selector::{Candidate, PrioritySelector};
pub use usage::{
    JsonlUsageStore, MemoryUsageStore, UsageRecord, UsageRecorder, UsageStore, UsageSummary,
};

pub use types::{
    CompletionRequest, CompletionResponse, Cost, ModelRates, PricingDescriptor, ProviderFamily,
    ProviderStats, Timing, Usage, estimate_tokens,
};

/// Crate version.
pub const PKG_VERSION: &str = env!("CARGO_PKG_VERSION");
