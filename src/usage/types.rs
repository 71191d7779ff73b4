use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::HashMap;

/// Token counts of one usage record, or a sum of them.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenCounts {
    pub input: u64,
    pub cache_creation: u64,
    pub cache_read: u64,
    pub output: u64,
}

impl TokenCounts {
    /// Tokens that occupy the context window; decides the pricing tier.
    /// Saturates, so absurd counts land in the long tier instead of wrapping.
    pub fn context_size(&self) -> u64 {
        self.input
            .saturating_add(self.cache_creation)
            .saturating_add(self.cache_read)
    }

    pub fn total(&self) -> u64 {
        self.context_size().saturating_add(self.output)
    }

    pub fn is_zero(&self) -> bool {
        self.input == 0 && self.cache_creation == 0 && self.cache_read == 0 && self.output == 0
    }
}

/// One parsed log line.
///
/// `usage == None` marks a non-billable message (user prompt, tool result)
/// which closes any open turn.
#[derive(Debug, Clone, PartialEq)]
pub struct UsageEvent {
    pub role: String,
    pub timestamp: Option<String>,
    pub model: Option<String>,
    pub usage: Option<TokenCounts>,
}

impl UsageEvent {
    #[cfg(test)]
    pub(crate) fn assistant(timestamp: &str, usage: TokenCounts) -> Self {
        Self {
            role: "assistant".to_string(),
            timestamp: Some(timestamp.to_string()),
            model: None,
            usage: Some(usage),
        }
    }

    #[cfg(test)]
    pub(crate) fn with_model(mut self, model: &str) -> Self {
        self.model = Some(model.to_string());
        self
    }

    pub fn is_billable(&self) -> bool {
        self.usage.is_some()
    }

    pub fn is_assistant(&self) -> bool {
        self.role == "assistant"
    }

    pub fn tokens(&self) -> TokenCounts {
        self.usage.unwrap_or_default()
    }

    pub fn month_key(&self) -> Option<String> {
        self.timestamp.as_deref().and_then(month_key)
    }
}

/// Consecutive billable events forming one user-visible response.
///
/// Never empty; only the last event is billed.
#[derive(Debug, Clone, PartialEq)]
pub struct Turn {
    events: Vec<UsageEvent>,
}

impl Turn {
    /// Returns `None` for an empty list or if any event is non-billable.
    pub fn from_events(events: Vec<UsageEvent>) -> Option<Self> {
        if events.is_empty() || !events.iter().all(UsageEvent::is_billable) {
            return None;
        }
        Some(Self { events })
    }

    /// Number of messages merged into this turn.
    pub fn event_count(&self) -> usize {
        self.events.len()
    }

    pub fn billed_event(&self) -> &UsageEvent {
        &self.events[self.events.len() - 1]
    }

    pub fn tokens(&self) -> TokenCounts {
        self.billed_event().tokens()
    }

    pub fn month_key(&self) -> Option<String> {
        self.billed_event().month_key()
    }

    pub fn model(&self) -> Option<&str> {
        self.billed_event().model.as_deref()
    }
}

/// Per-category costs, either computed from a rate card or estimated from a
/// reported lump sum.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct CategoryCosts {
    pub input: f64,
    pub cache_creation: f64,
    pub cache_read: f64,
    pub output: f64,
}

impl CategoryCosts {
    pub fn total(&self) -> f64 {
        self.input + self.cache_creation + self.cache_read + self.output
    }

    pub fn scaled(&self, factor: f64) -> Self {
        Self {
            input: self.input * factor,
            cache_creation: self.cache_creation * factor,
            cache_read: self.cache_read * factor,
            output: self.output * factor,
        }
    }
}

/// Accumulated tokens and cost for one month, project or model.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TokenBreakdown {
    pub input_tokens: u64,
    pub cache_creation_tokens: u64,
    pub cache_read_tokens: u64,
    pub output_tokens: u64,
    /// Largest single-event context seen. Informational, never priced.
    pub max_context_size: u64,
    /// Sum of per-turn costs, or of reported spend for remote data.
    pub accumulated_cost: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub estimated: Option<CategoryCosts>,
}

impl TokenBreakdown {
    pub fn add_tokens(&mut self, tokens: &TokenCounts) {
        self.input_tokens = self.input_tokens.saturating_add(tokens.input);
        self.cache_creation_tokens = self
            .cache_creation_tokens
            .saturating_add(tokens.cache_creation);
        self.cache_read_tokens = self.cache_read_tokens.saturating_add(tokens.cache_read);
        self.output_tokens = self.output_tokens.saturating_add(tokens.output);
    }

    /// Fold one billed turn in.
    pub fn add_turn(&mut self, tokens: &TokenCounts, cost: f64) {
        self.add_tokens(tokens);
        self.max_context_size = self.max_context_size.max(tokens.context_size());
        self.accumulated_cost += cost;
    }

    pub fn merge(&mut self, other: &TokenBreakdown) {
        self.add_tokens(&other.tokens());
        self.max_context_size = self.max_context_size.max(other.max_context_size);
        self.accumulated_cost += other.accumulated_cost;
        self.estimated = match (self.estimated, other.estimated) {
            (Some(a), Some(b)) => Some(CategoryCosts {
                input: a.input + b.input,
                cache_creation: a.cache_creation + b.cache_creation,
                cache_read: a.cache_read + b.cache_read,
                output: a.output + b.output,
            }),
            (a, b) => a.or(b),
        };
    }

    pub fn tokens(&self) -> TokenCounts {
        TokenCounts {
            input: self.input_tokens,
            cache_creation: self.cache_creation_tokens,
            cache_read: self.cache_read_tokens,
            output: self.output_tokens,
        }
    }

    pub fn has_tokens(&self) -> bool {
        !self.tokens().is_zero()
    }
}

/// One row of a published aggregate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsageEntry {
    pub key: String,
    pub cost: f64,
    pub details: TokenBreakdown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataSource {
    Api,
    Local,
}

/// Month entries, newest first.
pub fn month_entries(map: HashMap<String, TokenBreakdown>) -> Vec<UsageEntry> {
    let mut entries = into_entries(map);
    entries.sort_by(|a, b| b.key.cmp(&a.key));
    entries
}

/// Entries ranked by cost, highest first; ties broken by key.
pub fn cost_ranked_entries(map: HashMap<String, TokenBreakdown>) -> Vec<UsageEntry> {
    let mut entries = into_entries(map);
    entries.sort_by(|a, b| {
        b.cost
            .partial_cmp(&a.cost)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.key.cmp(&b.key))
    });
    entries
}

fn into_entries(map: HashMap<String, TokenBreakdown>) -> Vec<UsageEntry> {
    map.into_iter()
        .map(|(key, details)| UsageEntry {
            key,
            cost: details.accumulated_cost,
            details,
        })
        .collect()
}

/// `YYYY-MM` prefix of an ISO 8601 timestamp or date.
pub fn month_key(ts: &str) -> Option<String> {
    let prefix = ts.get(..7)?;
    let bytes = prefix.as_bytes();
    let digits = |range: std::ops::Range<usize>| bytes[range].iter().all(u8::is_ascii_digit);
    if digits(0..4) && bytes[4] == b'-' && digits(5..7) {
        Some(prefix.to_string())
    } else {
        None
    }
}
