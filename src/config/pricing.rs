//! Token pricing for realtime and chat models.
//!
//! This module is the single source of truth for per-1K token rates used to
//! turn a response's usage report into a USD cost breakdown.
//!
//! # Cached input
//!
//! Input tokens the provider reports as served from its prompt cache are
//! excluded from the plain input count and billed at half the input rate.
//!
//! # Usage
//!
//! ```rust,ignore
//! use waav_realtime::config::pricing::{calculate_cost, get_token_pricing};
//!
//! let pricing = get_token_pricing("gpt-4o-realtime-preview");
//! let cost = calculate_cost(&pricing, 1000, 500, 200);
//! println!("${:.4}", cost.total_cost_usd);
//! ```
//!
//! # Updates
//!
//! When provider pricing changes, update the table below.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::LazyLock;

/// Share of the input rate charged for cached input tokens.
pub const CACHED_INPUT_DISCOUNT: f64 = 0.5;

const TOKENS_PER_THOUSAND: f64 = 1000.0;

/// Rates used when no model family matches (gpt-4o-realtime).
pub const DEFAULT_TOKEN_PRICING: TokenPricing = TokenPricing::new(0.06, 0.24);

// =============================================================================
// Pricing Types
// =============================================================================

/// Per-1K token rates in USD.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TokenPricing {
    /// USD per 1000 input tokens
    pub input_cost_per_1k: f64,
    /// USD per 1000 output tokens
    pub output_cost_per_1k: f64,
}

impl TokenPricing {
    /// Create a new pricing entry.
    pub const fn new(input_cost_per_1k: f64, output_cost_per_1k: f64) -> Self {
        Self {
            input_cost_per_1k,
            output_cost_per_1k,
        }
    }

    /// A configured entry is only usable when both rates are set.
    #[inline]
    pub fn is_configured(&self) -> bool {
        self.input_cost_per_1k > 0.0 && self.output_cost_per_1k > 0.0
    }

    /// USD per 1000 cached input tokens.
    #[inline]
    pub fn cached_cost_per_1k(&self) -> f64 {
        self.input_cost_per_1k * CACHED_INPUT_DISCOUNT
    }
}

/// Token counts and derived costs for one response turn.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CostInfo {
    /// Input tokens, cached ones included
    pub input_tokens: u32,
    /// Output tokens
    pub output_tokens: u32,
    /// Input tokens served from cache
    pub cached_tokens: u32,
    /// Cost of the non-cached input tokens
    pub input_cost_usd: f64,
    /// Cost of the output tokens
    pub output_cost_usd: f64,
    /// Cost of the cached input tokens
    pub cached_cost_usd: f64,
    /// Sum of all of the above
    pub total_cost_usd: f64,
}

impl CostInfo {
    /// Input tokens billed at the full input rate.
    #[inline]
    pub fn plain_input_tokens(&self) -> u32 {
        self.input_tokens.saturating_sub(self.cached_tokens)
    }
}

// =============================================================================
// Pricing Table
// =============================================================================

/// Rates keyed by model family prefix.
static TOKEN_PRICING: LazyLock<HashMap<&'static str, TokenPricing>> = LazyLock::new(|| {
    let mut m = HashMap::new();

    // Realtime models
    m.insert("gpt-4o-realtime", DEFAULT_TOKEN_PRICING);
    m.insert("gpt-4o-mini-realtime", TokenPricing::new(0.01, 0.02));

    // Chat models
    m.insert("gpt-4o", TokenPricing::new(0.0025, 0.01));
    m.insert("gpt-4o-mini", TokenPricing::new(0.00015, 0.0006));
    m.insert("gpt-4", TokenPricing::new(0.03, 0.06));
    m.insert("gpt-3.5-turbo", TokenPricing::new(0.0015, 0.002));

    m
});

/// Look up the rates for a model by its longest matching family prefix.
///
/// `gpt-4o-mini-realtime-preview` resolves to `gpt-4o-mini-realtime`, not
/// `gpt-4o`. Unknown models get the default realtime rates.
pub fn get_token_pricing(model: &str) -> TokenPricing {
    let model = model.to_lowercase();
    TOKEN_PRICING
        .iter()
        .filter(|(family, _)| model.starts_with(*family))
        .max_by_key(|(family, _)| family.len())
        .map(|(_, pricing)| *pricing)
        .unwrap_or(DEFAULT_TOKEN_PRICING)
}

/// Pick configured rates when usable, otherwise the model family defaults.
pub fn resolve_pricing(configured: Option<TokenPricing>, model: &str) -> TokenPricing {
    match configured {
        Some(pricing) if pricing.is_configured() => pricing,
        Some(_) => {
            tracing::warn!(
                "Incomplete pricing configured for {}, using model defaults",
                model
            );
            get_token_pricing(model)
        }
        None => get_token_pricing(model),
    }
}

/// List the model families with built-in rates.
pub fn list_priced_families() -> Vec<&'static str> {
    let mut families: Vec<_> = TOKEN_PRICING.keys().copied().collect();
    families.sort_unstable();
    families
}

// =============================================================================
// Cost Calculation
// =============================================================================

/// Compute the cost breakdown for one turn.
///
/// `input_tokens` includes `cached_tokens`; the cached share is billed at
/// [`CACHED_INPUT_DISCOUNT`] of the input rate.
pub fn calculate_cost(
    pricing: &TokenPricing,
    input_tokens: u32,
    output_tokens: u32,
    cached_tokens: u32,
) -> CostInfo {
    let cached_tokens = cached_tokens.min(input_tokens);
    let plain_input = input_tokens - cached_tokens;

    let input_cost_usd = plain_input as f64 / TOKENS_PER_THOUSAND * pricing.input_cost_per_1k;
    let cached_cost_usd = cached_tokens as f64 / TOKENS_PER_THOUSAND * pricing.cached_cost_per_1k();
    let output_cost_usd = output_tokens as f64 / TOKENS_PER_THOUSAND * pricing.output_cost_per_1k;

    CostInfo {
        input_tokens,
        output_tokens,
        cached_tokens,
        input_cost_usd,
        output_cost_usd,
        cached_cost_usd,
        total_cost_usd: input_cost_usd + cached_cost_usd + output_cost_usd,
    }
}
