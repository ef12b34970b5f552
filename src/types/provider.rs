//! Provider family and introspection types.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::pricing::PricingDescriptor;

/// Wire protocol family a provider speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderFamily {
    /// Self-hosted model server (`/api/generate`, `/api/tags`).
    SelfHosted,
    /// Hosted chat-completions API with bearer auth.
    ChatCompletions,
    /// Hosted messages API with key + version headers.
    Messages,
}

impl ProviderFamily {
    /// Whether providers of this family need a credential unless configured otherwise.
    pub fn requires_credential(self) -> bool {
        !matches!(self, ProviderFamily::SelfHosted)
    }

    /// Default probe timeout for this family.
    pub fn default_probe_timeout(self) -> Duration {
        match self {
            ProviderFamily::SelfHosted => Duration::from_secs(5),
            ProviderFamily::ChatCompletions | ProviderFamily::Messages => Duration::from_secs(10),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ProviderFamily::SelfHosted => "self_hosted",
            ProviderFamily::ChatCompletions => "chat_completions",
            ProviderFamily::Messages => "messages",
        }
    }
}

impl fmt::Display for ProviderFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Read-only view of a provider for administrative screens.
///
/// Never carries the credential itself, only whether one is present.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProviderStats {
    pub key: String,
    pub display_name: String,
    pub family: ProviderFamily,
    pub endpoint: String,
    pub model: String,
    pub enabled: bool,
    pub available: bool,
    pub priority: Option<u32>,
    pub has_credential: bool,
    pub avg_latency_ms: Option<f64>,
    pub avg_tokens_per_second: Option<f64>,
    pub last_probed: Option<DateTime<Utc>>,
    pub pricing: PricingDescriptor,
}
