//! Response caching.
//!
//! - [`Fingerprint`] identifies a cacheable request *as sent to one provider*:
//!   provider key and model are part of the hash, so the same prompt routed
//!   to different providers or models never shares an entry.
//!
//! - [`response::ResponseCache`] is a bounded LRU + TTL store (moka) shared
//!   by all in-flight requests without a global lock.

pub mod response;

pub use response::{CacheConfig, CacheStats, ResponseCache};

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use crate::types::CompletionRequest;

/// Deterministic cache key for one (request, provider, model) triple.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Fingerprint(pub u64);

impl Fingerprint {
    /// Hash the caller identity, feature tag, args, prompt, provider and model.
    ///
    /// Generation knobs (`max_tokens`, `temperature`) are not part of the key.
    pub fn compute(request: &CompletionRequest, provider_key: &str, model: &str) -> Self {
        let mut hasher = DefaultHasher::new();
        request.user_id.hash(&mut hasher);
        request.tool_tag.hash(&mut hasher);
        // serde_json::Value objects serialise with sorted keys
        request.args.to_string().hash(&mut hasher);
        request.prompt.hash(&mut hasher);
        provider_key.hash(&mut hasher);
        model.hash(&mut hasher);
        Self(hasher.finish())
    }
}

impl std::fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}
