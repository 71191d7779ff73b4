use serde::Serialize;

use super::types::{CategoryCosts, TokenCounts, Turn};

/// Context size above which a turn is billed at long-context rates.
/// Selection uses strict inequality: exactly this many tokens is still standard.
pub const DEFAULT_LONG_CONTEXT_THRESHOLD: u64 = 200_000;

const TOKENS_PER_MILLION: f64 = 1_000_000.0;

/// Per-category rates, in currency per million tokens.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct RateCard {
    pub input: f64,
    pub output: f64,
    pub cache_creation: f64,
    pub cache_read: f64,
}

impl RateCard {
    pub const STANDARD: RateCard = RateCard {
        input: 3.00,
        output: 15.00,
        cache_creation: 3.75,
        cache_read: 0.30,
    };

    pub const LONG: RateCard = RateCard {
        input: 6.00,
        output: 22.50,
        cache_creation: 7.50,
        cache_read: 0.60,
    };

    pub fn is_valid(&self) -> bool {
        [self.input, self.output, self.cache_creation, self.cache_read]
            .iter()
            .all(|rate| rate.is_finite() && *rate >= 0.0)
    }

    /// Cost of each token category at this card's rates.
    pub fn category_costs(&self, tokens: &TokenCounts) -> CategoryCosts {
        CategoryCosts {
            input: tokens.input as f64 * per_token(self.input),
            cache_creation: tokens.cache_creation as f64 * per_token(self.cache_creation),
            cache_read: tokens.cache_read as f64 * per_token(self.cache_read),
            output: tokens.output as f64 * per_token(self.output),
        }
    }

    pub fn cost(&self, tokens: &TokenCounts) -> f64 {
        self.category_costs(tokens).total()
    }
}

impl Default for RateCard {
    fn default() -> Self {
        RateCard::STANDARD
    }
}

fn per_token(rate_per_million: f64) -> f64 {
    rate_per_million / TOKENS_PER_MILLION
}

/// Two-tier rate table keyed by a single event's context size.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PricingTable {
    standard: RateCard,
    long: RateCard,
    threshold: u64,
}

impl Default for PricingTable {
    fn default() -> Self {
        PricingTable::new(RateCard::STANDARD, RateCard::LONG, DEFAULT_LONG_CONTEXT_THRESHOLD)
    }
}

impl PricingTable {
    pub fn new(standard: RateCard, long: RateCard, threshold: u64) -> Self {
        Self {
            standard,
            long,
            threshold,
        }
    }

    /// Rate card for an event whose context (input + cache creation + cache
    /// read) is `context_size` tokens.
    pub fn get_pricing(&self, context_size: u64) -> &RateCard {
        if context_size > self.threshold {
            &self.long
        } else {
            &self.standard
        }
    }

    /// Cost of one event, tier chosen by that event's own context size.
    pub fn event_cost(&self, tokens: &TokenCounts) -> f64 {
        self.get_pricing(tokens.context_size()).cost(tokens)
    }

    /// Billed cost of a turn: only its last event is priced.
    ///
    /// Aggregates must sum these per-turn amounts; pricing an aggregate's
    /// token totals would pick the wrong tier.
    pub fn turn_cost(&self, turn: &Turn) -> f64 {
        self.event_cost(&turn.tokens())
    }
}
