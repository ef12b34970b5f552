//! Public types for the Hugin API.

mod pricing;
mod provider;
mod request;
mod response;

pub use pricing::{Cost, ModelRates, PricingDescriptor};
pub use provider::{ProviderFamily, ProviderStats};
pub use request::CompletionRequest;
pub use response::{CompletionResponse, Timing, Usage, estimate_tokens};
