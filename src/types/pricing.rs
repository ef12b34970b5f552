//! Provider pricing descriptors and cost calculation.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use super::response::Usage;

/// How a provider charges for tokens.
///
/// Serialised with an internal `type` tag, so the TOML form reads:
///
/// ```toml
/// pricing = { type = "input_output", input_cost_per_1k = 0.003, output_cost_per_1k = 0.015 }
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PricingDescriptor {
    /// No charge (self-hosted models).
    #[default]
    Free,
    /// A single rate applied to all tokens.
    Flat { cost_per_1k: f64 },
    /// Separate prompt and completion rates, optionally overridden per model.
    InputOutput {
        input_cost_per_1k: f64,
        output_cost_per_1k: f64,
        #[serde(default, skip_serializing_if = "HashMap::is_empty")]
        models: HashMap<String, ModelRates>,
    },
}

/// Per-model rate override for [`PricingDescriptor::InputOutput`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ModelRates {
    pub input_cost_per_1k: f64,
    pub output_cost_per_1k: f64,
}

/// Computed cost of one call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Cost {
    pub input: f64,
    pub output: f64,
    pub total: f64,
}

impl PricingDescriptor {
    /// Cost of `usage` against `model` under this descriptor.
    pub fn cost(&self, model: &str, usage: &Usage) -> Cost {
        let prompt = f64::from(usage.prompt_tokens) / 1000.0;
        let completion = f64::from(usage.completion_tokens) / 1000.0;
        match self {
            PricingDescriptor::Free => Cost::default(),
            PricingDescriptor::Flat { cost_per_1k } => Cost {
                input: prompt * cost_per_1k,
                output: completion * cost_per_1k,
                total: f64::from(usage.total_tokens) / 1000.0 * cost_per_1k,
            },
            PricingDescriptor::InputOutput {
                input_cost_per_1k,
                output_cost_per_1k,
                models,
            } => {
                let (input_rate, output_rate) = models
                    .get(model)
                    .map(|r| (r.input_cost_per_1k, r.output_cost_per_1k))
                    .unwrap_or((*input_cost_per_1k, *output_cost_per_1k));
                let input = prompt * input_rate;
                let output = completion * output_rate;
                Cost {
                    input,
                    output,
                    total: input + output,
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn free_costs_nothing() {
        let cost = PricingDescriptor::Free.cost("m", &Usage::new(5000, 5000));
        assert_eq!(cost.total, 0.0);
    }

    #[test]
    fn flat_uses_total_tokens() {
        let pricing = PricingDescriptor::Flat { cost_per_1k: 0.5 };
        let cost = pricing.cost("m", &Usage::new(1000, 1000));
        assert!((cost.total - 1.0).abs() < 1e-9);
    }

    #[test]
    fn input_output_splits_rates() {
        let pricing = PricingDescriptor::InputOutput {
            input_cost_per_1k: 1.0,
            output_cost_per_1k: 2.0,
            models: HashMap::new(),
        };
        let cost = pricing.cost("m", &Usage::new(1000, 500));
        assert!((cost.input - 1.0).abs() < 1e-9);
        assert!((cost.output - 1.0).abs() < 1e-9);
        assert!((cost.total - 2.0).abs() < 1e-9);
    }

    #[test]
    fn input_output_prefers_model_override() {
        let mut models = HashMap::new();
        models.insert(
            "big".to_string(),
            ModelRates {
                input_cost_per_1k: 10.0,
                output_cost_per_1k: 20.0,
            },
        );
        let pricing = PricingDescriptor::InputOutput {
            input_cost_per_1k: 1.0,
            output_cost_per_1k: 2.0,
            models,
        };
        let usage = Usage::new(1000, 1000);
        assert!((pricing.cost("big", &usage).total - 30.0).abs() < 1e-9);
        assert!((pricing.cost("small", &usage).total - 3.0).abs() < 1e-9);
    }

    #[test]
    fn parses_tagged_toml() {
        #[derive(Deserialize)]
        struct Wrapper {
            pricing: PricingDescriptor,
        }
        let w: Wrapper = toml::from_str(
            r#"pricing = { type = "input_output", input_cost_per_1k = 1.0, output_cost_per_1k = 2.0 }"#,
        )
        .unwrap();
        assert!(matches!(
            w.pricing,
            PricingDescriptor::InputOutput {
                input_cost_per_1k,
                ..
            } if input_cost_per_1k == 1.0
        ));

        let w: Wrapper = toml::from_str(r#"pricing = { type = "free" }"#).unwrap();
        assert_eq!(w.pricing, PricingDescriptor::Free);
    }
}
