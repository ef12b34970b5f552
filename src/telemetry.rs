//! Telemetry metric name constants.
//!
//! Centralised metric names for hugin operations. Consumers install
//! their own `metrics` recorder (e.g. prometheus, statsd); without a
//! recorder installed, all metric calls are no-ops.
//!
//! # Metric naming conventions
//!
//! All metrics are prefixed with `hugin_`. Counters end in `_total`,
//! histograms use meaningful units (e.g. `_seconds`).
//!
//! # Common labels
//!
//! - `provider`: provider key (e.g. "local", "openai")
//! - `status`: outcome: "ok" or "error"
//! - `direction`: token direction: "prompt" or "completion"

/// Total provider calls made by the dispatcher (cache hits excluded).
///
/// Labels: `provider`, `status` ("ok" | "error").
pub const REQUESTS_TOTAL: &str = "hugin_requests_total";

/// Provider call duration in seconds.
///
/// Labels: `provider`.
pub const REQUEST_DURATION_SECONDS: &str = "hugin_request_duration_seconds";

/// Total retry attempts inside a provider adapter (not counting the initial call).
///
/// Labels: `provider`.
pub const RETRIES_TOTAL: &str = "hugin_retries_total";

/// Total times the dispatcher moved on to the next provider after a failure.
///
/// Labels: `provider` (the provider that failed).
pub const FAILOVERS_TOTAL: &str = "hugin_failovers_total";

/// Total tokens accounted.
///
/// Labels: `provider`, `direction` ("prompt" | "completion").
pub const TOKENS_TOTAL: &str = "hugin_tokens_total";

/// Accumulated cost in micro-units of the pricing currency.
///
/// Labels: `provider`.
pub const COST_MICROS_TOTAL: &str = "hugin_cost_micros_total";

/// Total response cache hits.
pub const CACHE_HITS_TOTAL: &str = "hugin_cache_hits_total";

/// Total response cache misses.
pub const CACHE_MISSES_TOTAL: &str = "hugin_cache_misses_total";

/// Total health probes.
///
/// Labels: `provider`, `status` ("ok" | "error").
pub const PROBES_TOTAL: &str = "hugin_probes_total";
