use chrono::{DateTime, Months, NaiveDate, Utc};
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

use super::pricing::RateCard;
use super::types::{month_key, TokenBreakdown, TokenCounts};
use crate::config::RemoteConfig;
use crate::error::RemoteError;

const DAILY_ACTIVITY_PATH: &str = "/user/daily/activity";
const USER_INFO_PATH: &str = "/user/info";

/// Hard stop for a server that never clears `has_more`.
const MAX_PAGES: u32 = 1_000;

/// Routing prefixes LiteLLM puts in front of model names.
const VENDOR_PREFIXES: &[&str] = &[
    "vertex_ai/",
    "bedrock/",
    "anthropic/",
    "azure/",
    "openai/",
    "gemini/",
];

/// Metrics block shared by the daily totals and the per-model breakdown.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ActivityMetrics {
    #[serde(default)]
    pub spend: f64,
    #[serde(default)]
    pub prompt_tokens: u64,
    #[serde(default)]
    pub completion_tokens: u64,
    #[serde(default)]
    pub cache_read_input_tokens: u64,
    #[serde(default)]
    pub cache_creation_input_tokens: u64,
    #[serde(default)]
    pub total_tokens: u64,
    #[serde(default)]
    pub successful_requests: u64,
    #[serde(default)]
    pub failed_requests: u64,
}

impl ActivityMetrics {
    pub fn counts(&self) -> TokenCounts {
        TokenCounts {
            input: self.prompt_tokens,
            cache_creation: self.cache_creation_input_tokens,
            cache_read: self.cache_read_input_tokens,
            output: self.completion_tokens,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ModelActivity {
    #[serde(default)]
    pub metrics: ActivityMetrics,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ActivityBreakdown {
    #[serde(default)]
    pub models: HashMap<String, ModelActivity>,
}

/// One day of metered activity.
#[derive(Debug, Clone, Deserialize)]
pub struct DailyActivity {
    pub date: String,
    #[serde(default)]
    pub metrics: ActivityMetrics,
    #[serde(default)]
    pub breakdown: ActivityBreakdown,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PageMetadata {
    #[serde(default)]
    pub page: u32,
    #[serde(default)]
    pub total_pages: u32,
    #[serde(default)]
    pub has_more: bool,
}

#[derive(Debug, Deserialize)]
struct ActivityPage {
    #[serde(default)]
    results: Vec<DailyActivity>,
    #[serde(default)]
    metadata: Option<PageMetadata>,
}

#[derive(Debug, Deserialize)]
struct UserInfoResponse {
    user_info: UserInfoData,
}

#[derive(Debug, Deserialize)]
struct UserInfoData {
    #[serde(default)]
    user_id: Option<String>,
    #[serde(default)]
    spend: f64,
    #[serde(default)]
    max_budget: Option<f64>,
    #[serde(default)]
    budget_duration: Option<String>,
    #[serde(default)]
    budget_reset_at: Option<String>,
}

/// Account spend and budget, as reported by `/user/info`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AccountInfo {
    pub user_id: Option<String>,
    pub spend: f64,
    pub max_budget: Option<f64>,
    pub budget_duration: Option<String>,
    pub budget_reset_at: Option<DateTime<Utc>>,
}

impl From<UserInfoData> for AccountInfo {
    fn from(data: UserInfoData) -> Self {
        let budget_reset_at = data.budget_reset_at.as_deref().and_then(|raw| {
            let parsed = DateTime::parse_from_rfc3339(raw).ok();
            if parsed.is_none() {
                tracing::debug!(raw, "unparsable budget_reset_at");
            }
            parsed.map(|dt| dt.with_timezone(&Utc))
        });

        AccountInfo {
            user_id: data.user_id,
            spend: data.spend,
            max_budget: data.max_budget,
            budget_duration: data.budget_duration,
            budget_reset_at,
        }
    }
}

/// Month and model aggregates built from reported spend.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RemoteUsage {
    pub monthly: HashMap<String, TokenBreakdown>,
    pub models: HashMap<String, TokenBreakdown>,
}

/// Client for a LiteLLM proxy's spend endpoints.
#[derive(Debug, Clone)]
pub struct RemoteClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    page_size: u32,
}

impl RemoteClient {
    pub fn new(base_url: &str, api_key: &str, timeout: Duration) -> Result<Self, RemoteError> {
        let api_key = api_key.trim();
        if api_key.is_empty() || !api_key.starts_with("sk-") {
            return Err(RemoteError::MissingCredential);
        }
        reqwest::Url::parse(base_url).map_err(|_| RemoteError::InvalidUrl(base_url.to_string()))?;

        let http = reqwest::Client::builder().timeout(timeout).build()?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            page_size: 100,
        })
    }

    pub fn from_config(config: &RemoteConfig) -> Result<Self, RemoteError> {
        let api_key = config.credential().ok_or(RemoteError::MissingCredential)?;
        Ok(Self::new(
            &config.base_url,
            api_key,
            Duration::from_secs(config.timeout_secs),
        )?
        .with_page_size(config.page_size))
    }

    pub fn with_page_size(mut self, page_size: u32) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T, RemoteError> {
        let response = self
            .http
            .get(format!("{}{}", self.base_url, path))
            .bearer_auth(&self.api_key)
            .header("Content-Type", "application/json")
            .query(query)
            .send()
            .await?;

        if response.status() != StatusCode::OK {
            return Err(RemoteError::Status(response.status().as_u16()));
        }

        let body = response.text().await?;
        serde_json::from_str(&body).map_err(|e| RemoteError::Decode(e.to_string()))
    }

    /// All daily records between `start` and `end` inclusive, following
    /// pagination until the server reports no more pages.
    pub async fn fetch_daily_activity(
        &self,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<DailyActivity>, RemoteError> {
        let mut results = Vec::new();
        let mut page = 1;

        loop {
            let query = [
                ("start_date", start.format("%Y-%m-%d").to_string()),
                ("end_date", end.format("%Y-%m-%d").to_string()),
                ("page", page.to_string()),
                ("page_size", self.page_size.to_string()),
            ];
            let body: ActivityPage = self.get_json(DAILY_ACTIVITY_PATH, &query).await?;
            results.extend(body.results);

            let has_more = body.metadata.map(|m| m.has_more).unwrap_or(false);
            if !has_more {
                break;
            }
            if page >= MAX_PAGES {
                return Err(RemoteError::Decode(format!(
                    "pagination did not finish after {} pages",
                    MAX_PAGES
                )));
            }
            page += 1;
        }

        tracing::debug!(pages = page, days = results.len(), "fetched daily activity");
        Ok(results)
    }

    /// Month and model aggregates over the trailing `window_months`.
    pub async fn fetch_usage(
        &self,
        today: NaiveDate,
        window_months: u32,
        standard: &RateCard,
    ) -> Result<RemoteUsage, RemoteError> {
        let start = today
            .checked_sub_months(Months::new(window_months))
            .unwrap_or(today);
        let days = self.fetch_daily_activity(start, today).await?;
        Ok(aggregate_activity(&days, standard))
    }

    pub async fn fetch_account_info(&self) -> Result<AccountInfo, RemoteError> {
        let response: UserInfoResponse = self.get_json(USER_INFO_PATH, &[]).await?;
        Ok(response.user_info.into())
    }

    pub async fn fetch_today_spend(&self, today: NaiveDate) -> Result<f64, RemoteError> {
        let days = self.fetch_daily_activity(today, today).await?;
        Ok(days.iter().map(|d| d.metrics.spend).sum())
    }
}

/// Fold daily records into month and model aggregates.
///
/// Costs are the reported spend, never recomputed. Each aggregate also gets
/// per-category estimates that sum back to that spend.
pub fn aggregate_activity(days: &[DailyActivity], standard: &RateCard) -> RemoteUsage {
    let mut usage = RemoteUsage::default();

    for day in days {
        let Some(month) = month_key(&day.date) else {
            tracing::debug!(date = %day.date, "skipping activity with bad date");
            continue;
        };
        fold_metrics(usage.monthly.entry(month).or_default(), &day.metrics);

        for (name, model) in &day.breakdown.models {
            fold_metrics(
                usage.models.entry(normalize_model_name(name)).or_default(),
                &model.metrics,
            );
        }
    }

    usage.models.retain(|_, b| b.accumulated_cost > 0.0);
    for breakdown in usage.monthly.values_mut().chain(usage.models.values_mut()) {
        apply_estimates(breakdown, standard);
    }

    usage
}

fn fold_metrics(breakdown: &mut TokenBreakdown, metrics: &ActivityMetrics) {
    breakdown.add_tokens(&metrics.counts());
    breakdown.accumulated_cost += metrics.spend;
}

/// Split the reported lump sum across categories in proportion to what the
/// standard rate card would charge for each.
pub fn apply_estimates(breakdown: &mut TokenBreakdown, standard: &RateCard) {
    let theoretical = standard.category_costs(&breakdown.tokens());
    let theoretical_total = theoretical.total();
    let factor = if theoretical_total > 0.0 {
        breakdown.accumulated_cost / theoretical_total
    } else {
        1.0
    };
    breakdown.estimated = Some(theoretical.scaled(factor));
}

/// `vertex_ai/claude-sonnet-4@20250514` -> `claude-sonnet-4`
pub fn normalize_model_name(name: &str) -> String {
    let stripped = VENDOR_PREFIXES
        .iter()
        .find_map(|prefix| name.strip_prefix(prefix))
        .unwrap_or(name);
    let base = stripped.split('@').next().unwrap_or(stripped);
    base.to_string()
}
