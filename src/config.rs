use anyhow::{Context, Result};
use serde::{Deserialize, Deserializer, Serialize};
use std::path::{Path, PathBuf};

use crate::usage::pricing::{PricingTable, RateCard, DEFAULT_LONG_CONTEXT_THRESHOLD};

const APP_NAME: &str = "usage-tracker";
const CONFIG_NAME: &str = "config";

/// LiteLLM proxy listens on :4000 unless told otherwise.
pub const DEFAULT_REMOTE_BASE_URL: &str = "http://localhost:4000";

const DEFAULT_TURN_WINDOW_SECS: f64 = 10.0;
const DEFAULT_WINDOW_MONTHS: u32 = 12;
const DEFAULT_TIMEOUT_SECS: u64 = 30;
const DEFAULT_PAGE_SIZE: u32 = 100;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub logs: LogsConfig,
    pub pricing: PricingConfig,
    pub turns: TurnsConfig,
    pub remote: RemoteConfig,
    pub display: DisplayConfig,
    pub server: ServerConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogsConfig {
    /// Root holding one sub-directory per project. `~` is expanded.
    pub path: String,
    pub extension: String,
}

impl Default for LogsConfig {
    fn default() -> Self {
        Self {
            path: "~/.claude/projects".to_string(),
            extension: "jsonl".to_string(),
        }
    }
}

impl LogsConfig {
    pub fn root(&self) -> PathBuf {
        PathBuf::from(shellexpand::tilde(&self.path).into_owned())
    }
}

/// Rates are currency per million tokens.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PricingConfig {
    #[serde(deserialize_with = "standard_card")]
    pub standard: RateCard,
    #[serde(deserialize_with = "long_card")]
    pub long: RateCard,
    pub long_context_threshold: u64,
}

impl Default for PricingConfig {
    fn default() -> Self {
        Self {
            standard: RateCard::STANDARD,
            long: RateCard::LONG,
            long_context_threshold: DEFAULT_LONG_CONTEXT_THRESHOLD,
        }
    }
}

impl PricingConfig {
    pub fn table(&self) -> PricingTable {
        PricingTable::new(self.standard, self.long, self.long_context_threshold)
    }
}

/// A `[pricing.*]` table as written; omitted rates keep the tier's default.
#[derive(Deserialize)]
struct RateCardOverrides {
    input: Option<f64>,
    output: Option<f64>,
    cache_creation: Option<f64>,
    cache_read: Option<f64>,
}

impl RateCardOverrides {
    fn over(self, base: RateCard) -> RateCard {
        RateCard {
            input: self.input.unwrap_or(base.input),
            output: self.output.unwrap_or(base.output),
            cache_creation: self.cache_creation.unwrap_or(base.cache_creation),
            cache_read: self.cache_read.unwrap_or(base.cache_read),
        }
    }
}

fn standard_card<'de, D: Deserializer<'de>>(deserializer: D) -> Result<RateCard, D::Error> {
    Ok(RateCardOverrides::deserialize(deserializer)?.over(RateCard::STANDARD))
}

fn long_card<'de, D: Deserializer<'de>>(deserializer: D) -> Result<RateCard, D::Error> {
    Ok(RateCardOverrides::deserialize(deserializer)?.over(RateCard::LONG))
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TurnsConfig {
    /// Maximum gap between two assistant messages of the same turn.
    pub continuation_window_secs: f64,
}

impl Default for TurnsConfig {
    fn default() -> Self {
        Self {
            continuation_window_secs: DEFAULT_TURN_WINDOW_SECS,
        }
    }
}

impl TurnsConfig {
    pub fn window(&self) -> chrono::Duration {
        chrono::Duration::milliseconds((self.continuation_window_secs * 1000.0).round() as i64)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
    pub api_key: String,
    pub base_url: String,
    pub window_months: u32,
    pub timeout_secs: u64,
    pub page_size: u32,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_url: DEFAULT_REMOTE_BASE_URL.to_string(),
            window_months: DEFAULT_WINDOW_MONTHS,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }
}

impl RemoteConfig {
    /// The API key, if it looks like a LiteLLM virtual key.
    pub fn credential(&self) -> Option<&str> {
        let key = self.api_key.trim();
        (!key.is_empty() && key.starts_with("sk-")).then_some(key)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    #[default]
    En,
    Es,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct DisplayConfig {
    pub language: Language,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub port: u16,
    pub refresh_interval_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 7878,
            refresh_interval_secs: 60,
        }
    }
}

impl Config {
    /// Replace out-of-range values with their defaults.
    pub fn sanitized(mut self) -> Self {
        if !self.pricing.standard.is_valid() {
            tracing::warn!("invalid standard pricing in config, using defaults");
            self.pricing.standard = RateCard::STANDARD;
        }
        if !self.pricing.long.is_valid() {
            tracing::warn!("invalid long-context pricing in config, using defaults");
            self.pricing.long = RateCard::LONG;
        }
        if self.pricing.long_context_threshold == 0 {
            self.pricing.long_context_threshold = DEFAULT_LONG_CONTEXT_THRESHOLD;
        }

        let window = self.turns.continuation_window_secs;
        if !window.is_finite() || window <= 0.0 {
            tracing::warn!(window, "invalid turn continuation window, using default");
            self.turns.continuation_window_secs = DEFAULT_TURN_WINDOW_SECS;
        }

        if self.remote.window_months == 0 {
            self.remote.window_months = DEFAULT_WINDOW_MONTHS;
        }
        if self.remote.timeout_secs == 0 {
            self.remote.timeout_secs = DEFAULT_TIMEOUT_SECS;
        }
        if self.remote.page_size == 0 {
            self.remote.page_size = DEFAULT_PAGE_SIZE;
        }
        if self.logs.extension.trim().is_empty() {
            self.logs.extension = LogsConfig::default().extension;
        }
        self.logs.extension = self.logs.extension.trim_start_matches('.').to_string();

        self
    }
}

/// Load configuration from `path`, or the platform default location.
///
/// A missing file is created with defaults. An unreadable or malformed file
/// is an error.
pub fn try_load_config(path: Option<&Path>) -> Result<Config> {
    let loaded: Result<Config, confy::ConfyError> = match path {
        Some(p) => confy::load_path(p),
        None => confy::load(APP_NAME, CONFIG_NAME),
    };
    loaded.map(Config::sanitized).context("Failed to load config")
}

/// Like [`try_load_config`], but an unreadable or malformed file is reported
/// and replaced by defaults in memory.
pub fn load_config_from(path: Option<&Path>) -> Config {
    match try_load_config(path) {
        Ok(config) => config,
        Err(e) => {
            tracing::warn!(error = %format_args!("{:#}", e), "using default config");
            Config::default()
        }
    }
}

pub fn save_config(config: &Config, path: Option<&Path>) -> Result<()> {
    match path {
        Some(p) => confy::store_path(p, config),
        None => confy::store(APP_NAME, CONFIG_NAME, config),
    }
    .context("Failed to save config")
}

pub fn config_path(path: Option<&Path>) -> Result<PathBuf> {
    match path {
        Some(p) => Ok(p.to_path_buf()),
        None => confy::get_configuration_file_path(APP_NAME, CONFIG_NAME)
            .context("Failed to resolve config path"),
    }
}
