//! Token pricing.

use serde::{Deserialize, Serialize};

use crate::types::{Provider, Usage};

/// USD price per 1,000 tokens.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TokenPricing {
    pub input_per_1k: f64,
    pub output_per_1k: f64,
}

/// Model-name prefixes with their own rates. First match wins, so more
/// specific prefixes come first.
const MODEL_PRICING: &[(&str, f64, f64)] = &[
    ("claude-3-opus", 0.015, 0.075),
    ("claude-3-haiku", 0.00025, 0.00125),
    ("gpt-4o-mini", 0.00015, 0.0006),
    ("gpt-4o", 0.005, 0.015),
    ("gpt-4-turbo", 0.01, 0.03),
    ("gpt-4", 0.03, 0.06),
];

impl TokenPricing {
    pub const fn new(input_per_1k: f64, output_per_1k: f64) -> Self {
        Self {
            input_per_1k,
            output_per_1k,
        }
    }

    /// Flat rate used for any model of `provider` without its own entry.
    pub const fn provider_default(provider: Provider) -> Self {
        match provider {
            Provider::Claude => Self::new(0.008, 0.024),
            Provider::OpenAi => Self::new(0.001, 0.002),
        }
    }

    /// Rates for `model`, falling back to the provider default.
    pub fn for_model(provider: Provider, model: &str) -> Self {
        MODEL_PRICING
            .iter()
            .find(|(prefix, _, _)| model.starts_with(prefix))
            .map(|&(_, input, output)| Self::new(input, output))
            .unwrap_or_else(|| Self::provider_default(provider))
    }

    /// Cost of `usage` in USD, rounded to six decimal places.
    pub fn cost(&self, usage: &Usage) -> f64 {
        let input = f64::from(usage.prompt_tokens) / 1000.0 * self.input_per_1k;
        let output = f64::from(usage.completion_tokens) / 1000.0 * self.output_per_1k;
        round6(input + output)
    }
}

fn round6(value: f64) -> f64 {
    (value * 1_000_000.0).round() / 1_000_000.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn claude_default_rate() {
        let pricing = TokenPricing::for_model(Provider::Claude, "claude-3-sonnet-20240229");
        assert_eq!(pricing.cost(&Usage::new(1000, 1000)), 0.032);
        assert_eq!(pricing.cost(&Usage::new(10, 20)), 0.000560);
    }

    #[test]
    fn openai_default_rate() {
        let pricing = TokenPricing::for_model(Provider::OpenAi, "gpt-3.5-turbo");
        assert_eq!(pricing.cost(&Usage::new(1500, 500)), 0.0025);
    }

    #[test]
    fn specific_prefix_wins() {
        assert_eq!(
            TokenPricing::for_model(Provider::OpenAi, "gpt-4o-mini-2024"),
            TokenPricing::new(0.00015, 0.0006)
        );
        assert_eq!(
            TokenPricing::for_model(Provider::OpenAi, "gpt-4-0613"),
            TokenPricing::new(0.03, 0.06)
        );
    }

    #[test]
    fn rounds_to_six_places() {
        let pricing = TokenPricing::new(0.0000001, 0.0);
        assert_eq!(pricing.cost(&Usage::new(1, 0)), 0.0);
    }
}
