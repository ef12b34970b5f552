//! Usage recorder: token and cost accounting for every uncached call.
//!
//! Each provider call that reaches the network produces one immutable
//! [`UsageRecord`] and increments the provider's [`UsageSummary`]. Storage
//! is pluggable via [`UsageStore`]; recording is best-effort and never fails
//! the request that produced it.

use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, warn};

use crate::telemetry;
use crate::types::{CompletionResponse, PricingDescriptor, Usage, estimate_tokens};
use crate::{HuginError, Result};

/// One accounted provider call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsageRecord {
    pub provider_key: String,
    pub model_id: String,
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
    pub input_cost: f64,
    pub output_cost: f64,
    pub total_cost: f64,
    /// Token counts were estimated from text length.
    #[serde(default)]
    pub estimated: bool,
    /// Requesting user; absent for administrative test calls.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requestor: Option<String>,
    #[serde(default)]
    pub tool_tag: String,
    pub timestamp: DateTime<Utc>,
}

/// Cumulative usage for one provider.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UsageSummary {
    pub provider_key: String,
    pub request_count: u64,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
    pub total_cost: f64,
    pub last_used: Option<DateTime<Utc>>,
}

impl UsageSummary {
    pub fn new(provider_key: impl Into<String>) -> Self {
        Self {
            provider_key: provider_key.into(),
            ..Default::default()
        }
    }

    /// Increment-on-write.
    pub fn apply(&mut self, record: &UsageRecord) {
        self.request_count += 1;
        self.prompt_tokens += u64::from(record.prompt_tokens);
        self.completion_tokens += u64::from(record.completion_tokens);
        self.total_tokens += u64::from(record.total_tokens);
        self.total_cost += record.total_cost;
        self.last_used = Some(
            self.last_used
                .map_or(record.timestamp, |t| t.max(record.timestamp)),
        );
    }
}

/// Persistence for usage records and summaries.
#[async_trait]
pub trait UsageStore: Send + Sync {
    /// Append a record and update its provider's summary.
    async fn append(&self, record: &UsageRecord) -> Result<()>;

    /// Summaries for every provider with recorded usage, sorted by key.
    async fn summaries(&self) -> Result<Vec<UsageSummary>>;

    /// The most recent records, newest last.
    async fn recent(&self, limit: usize) -> Result<Vec<UsageRecord>>;
}

fn apply_to(summaries: &mut HashMap<String, UsageSummary>, record: &UsageRecord) {
    summaries
        .entry(record.provider_key.clone())
        .or_insert_with(|| UsageSummary::new(&record.provider_key))
        .apply(record);
}

fn sorted(summaries: &HashMap<String, UsageSummary>) -> Vec<UsageSummary> {
    let mut out: Vec<_> = summaries.values().cloned().collect();
    out.sort_by(|a, b| a.provider_key.cmp(&b.provider_key));
    out
}

/// Records kept by [`MemoryUsageStore::new`].
pub const DEFAULT_RECENT_CAPACITY: usize = 1_000;

/// In-memory usage store.
///
/// Summaries cover every record ever appended; only the newest `capacity`
/// records are retained for [`UsageStore::recent`].
pub struct MemoryUsageStore {
    capacity: usize,
    inner: RwLock<MemoryInner>,
}

#[derive(Default)]
struct MemoryInner {
    records: VecDeque<UsageRecord>,
    summaries: HashMap<String, UsageSummary>,
}

impl MemoryUsageStore {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_RECENT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity,
            inner: RwLock::new(MemoryInner::default()),
        }
    }
}

impl Default for MemoryUsageStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl UsageStore for MemoryUsageStore {
    async fn append(&self, record: &UsageRecord) -> Result<()> {
        let mut inner = self.inner.write().await;
        apply_to(&mut inner.summaries, record);
        inner.records.push_back(record.clone());
        while inner.records.len() > self.capacity {
            inner.records.pop_front();
        }
        Ok(())
    }

    async fn summaries(&self) -> Result<Vec<UsageSummary>> {
        Ok(sorted(&self.inner.read().await.summaries))
    }

    async fn recent(&self, limit: usize) -> Result<Vec<UsageRecord>> {
        let inner = self.inner.read().await;
        let skip = inner.records.len().saturating_sub(limit);
        Ok(inner.records.iter().skip(skip).cloned().collect())
    }
}

/// Append-only JSON lines usage log.
///
/// Summaries are rebuilt by replaying the file on open and kept in memory.
pub struct JsonlUsageStore {
    path: PathBuf,
    summaries: Mutex<HashMap<String, UsageSummary>>,
}

impl JsonlUsageStore {
    /// Open (or lazily create) the log at `path`.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let mut summaries = HashMap::new();
        for record in read_records(&path).await? {
            apply_to(&mut summaries, &record);
        }
        debug!(path = %path.display(), providers = summaries.len(), "usage log replayed");
        Ok(Self {
            path,
            summaries: Mutex::new(summaries),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn ensure_parent_dir(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| HuginError::Storage(format!("failed to create usage dir: {e}")))?;
        }
        Ok(())
    }
}

fn parse_line(line: &str) -> Option<UsageRecord> {
    if line.trim().is_empty() {
        return None;
    }
    serde_json::from_str(line).ok()
}

async fn read_records(path: &Path) -> Result<Vec<UsageRecord>> {
    let file = match File::open(path).await {
        Ok(file) => file,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(HuginError::Storage(format!("failed to open usage log: {e}"))),
    };
    let mut lines = BufReader::new(file).lines();
    let mut records = Vec::new();
    while let Some(line) = lines
        .next_line()
        .await
        .map_err(|e| HuginError::Storage(format!("failed to read usage log: {e}")))?
    {
        if let Some(record) = parse_line(&line) {
            records.push(record);
        }
    }
    Ok(records)
}

#[async_trait]
impl UsageStore for JsonlUsageStore {
    async fn append(&self, record: &UsageRecord) -> Result<()> {
        // Held across the write so lines and summaries stay in the same order.
        let mut summaries = self.summaries.lock().await;
        self.ensure_parent_dir().await?;

        let mut line = serde_json::to_string(record)?;
        line.push('\n');
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .map_err(|e| HuginError::Storage(format!("failed to open usage log: {e}")))?;
        file.write_all(line.as_bytes())
            .await
            .map_err(|e| HuginError::Storage(format!("failed to write usage record: {e}")))?;
        file.flush()
            .await
            .map_err(|e| HuginError::Storage(format!("failed to flush usage log: {e}")))?;

        apply_to(&mut summaries, record);
        Ok(())
    }

    async fn summaries(&self) -> Result<Vec<UsageSummary>> {
        Ok(sorted(&*self.summaries.lock().await))
    }

    async fn recent(&self, limit: usize) -> Result<Vec<UsageRecord>> {
        let _guard = self.summaries.lock().await;
        let mut records = read_records(&self.path).await?;
        let start = records.len().saturating_sub(limit);
        Ok(records.split_off(start))
    }
}

/// Computes cost and writes usage records.
#[derive(Clone)]
pub struct UsageRecorder {
    store: Arc<dyn UsageStore>,
}

impl UsageRecorder {
    pub fn new(store: Arc<dyn UsageStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<dyn UsageStore> {
        &self.store
    }

    /// Build the record for one call.
    ///
    /// When the provider reported no usage, tokens are estimated from the
    /// prompt and content lengths and the record is flagged `estimated`.
    pub fn build_record(
        provider_key: &str,
        pricing: &PricingDescriptor,
        prompt: &str,
        response: &CompletionResponse,
        requestor: Option<&str>,
        tool_tag: &str,
    ) -> UsageRecord {
        let (usage, estimated) = match response.usage {
            Some(usage) => (usage, false),
            None => (
                Usage::new(estimate_tokens(prompt), estimate_tokens(&response.content)),
                true,
            ),
        };
        let cost = pricing.cost(&response.model, &usage);
        UsageRecord {
            provider_key: provider_key.to_string(),
            model_id: response.model.clone(),
            prompt_tokens: usage.prompt_tokens,
            completion_tokens: usage.completion_tokens,
            total_tokens: usage.total_tokens,
            input_cost: cost.input,
            output_cost: cost.output,
            total_cost: cost.total,
            estimated,
            requestor: requestor.map(str::to_string),
            tool_tag: tool_tag.to_string(),
            timestamp: Utc::now(),
        }
    }

    /// Persist a record. Failures are logged and swallowed.
    pub async fn record(&self, record: UsageRecord) {
        let provider = record.provider_key.clone();
        metrics::counter!(telemetry::TOKENS_TOTAL,
            "provider" => provider.clone(),
            "direction" => "prompt",
        )
        .increment(u64::from(record.prompt_tokens));
        metrics::counter!(telemetry::TOKENS_TOTAL,
            "provider" => provider.clone(),
            "direction" => "completion",
        )
        .increment(u64::from(record.completion_tokens));
        metrics::counter!(telemetry::COST_MICROS_TOTAL, "provider" => provider.clone())
            .increment((record.total_cost * 1_000_000.0).round() as u64);

        if let Err(e) = self.store.append(&record).await {
            warn!(provider = %provider, error = %e, "failed to record usage");
        }
    }
}
