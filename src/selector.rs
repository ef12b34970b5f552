//! Priority selector: orders eligible providers for one request.
//!
//! Providers with an explicit priority come first, ascending (1 before 2).
//! The rest follow in registry order. Disabled or unavailable providers are
//! dropped. Ties keep registry order.

use std::sync::Arc;

use crate::registry::{Provider, ProviderState};

/// A provider chosen for an attempt, with the state it was chosen under.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub provider: Arc<Provider>,
    pub state: ProviderState,
}

impl Candidate {
    pub fn key(&self) -> &str {
        self.provider.key()
    }
}

/// Orders providers by configured priority.
#[derive(Debug, Default, Clone, Copy)]
pub struct PrioritySelector;

impl PrioritySelector {
    pub fn new() -> Self {
        Self
    }

    /// Order `providers` (given in registry order) into attempt order.
    pub fn order(&self, providers: Vec<(Arc<Provider>, ProviderState)>) -> Vec<Candidate> {
        let (mut ranked, unranked): (Vec<_>, Vec<_>) = providers
            .into_iter()
            .filter(|(_, state)| state.enabled && state.available && !state.missing_credential())
            .partition(|(_, state)| state.priority.is_some());
        // sort_by_key is stable, so equal priorities keep registry order
        ranked.sort_by_key(|(_, state)| state.priority);

        ranked
            .into_iter()
            .chain(unranked)
            .map(|(provider, state)| Candidate { provider, state })
            .collect()
    }
}
