use serde::{Deserialize, Serialize};

use crate::config::PricingConfig;
use crate::usage::RateCard;

/// Generic API response wrapper
#[derive(Serialize)]
pub struct ApiResponse<T: Serialize> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message.into()),
        }
    }
}

/// Rate cards in effect, per million tokens
#[derive(Serialize)]
pub struct PricingDto {
    pub standard: RateCard,
    pub long: RateCard,
    pub long_context_threshold: u64,
}

impl From<&PricingConfig> for PricingDto {
    fn from(pricing: &PricingConfig) -> Self {
        Self {
            standard: pricing.standard,
            long: pricing.long,
            long_context_threshold: pricing.long_context_threshold,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReportFormatParam {
    #[default]
    Json,
    Csv,
}

#[derive(Debug, Default, Deserialize)]
pub struct ReportQuery {
    #[serde(default)]
    pub format: ReportFormatParam,
}
