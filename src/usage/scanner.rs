use chrono::Duration;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader, ErrorKind};
use std::path::{Path, PathBuf};

use super::pricing::PricingTable;
use super::turns::{TurnSegmenter, DEFAULT_TURN_WINDOW_SECS};
use super::types::*;
use crate::config::Config;
use crate::error::UsageError;

/// Directory-name segments after which the real project name starts.
const PROJECT_ANCHORS: &[&str] = &["PERSONAL", "Documents"];

const UNKNOWN_MODEL: &str = "Unknown Model";

/// Eight hex digits: a generated id rather than a readable name.
static HEX_ID: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[0-9a-fA-F]{8}$").expect("valid regex"));

/// Aggregates built from the local log tree.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LocalUsage {
    pub monthly: HashMap<String, TokenBreakdown>,
    pub projects: HashMap<String, TokenBreakdown>,
    pub models: HashMap<String, TokenBreakdown>,
}

impl LocalUsage {
    pub fn is_empty(&self) -> bool {
        self.monthly.is_empty() && self.projects.is_empty() && self.models.is_empty()
    }

    pub fn monthly_entries(&self) -> Vec<UsageEntry> {
        month_entries(self.monthly.clone())
    }

    pub fn project_entries(&self) -> Vec<UsageEntry> {
        cost_ranked_entries(self.projects.clone())
    }

    /// Models that accumulated no cost are left out.
    pub fn model_entries(&self) -> Vec<UsageEntry> {
        let spent = self
            .models
            .iter()
            .filter(|(_, b)| b.accumulated_cost > 0.0)
            .map(|(k, b)| (k.clone(), b.clone()))
            .collect();
        cost_ranked_entries(spent)
    }
}

/// Walks `<root>/<project>/*.<extension>` and folds every billed turn into
/// month, project and model aggregates.
#[derive(Debug, Clone)]
pub struct LocalScanner {
    root: PathBuf,
    extension: String,
    pricing: PricingTable,
    turn_window: Duration,
}

impl LocalScanner {
    pub fn new(root: impl Into<PathBuf>, pricing: PricingTable) -> Self {
        Self {
            root: root.into(),
            extension: "jsonl".to_string(),
            pricing,
            turn_window: Duration::seconds(DEFAULT_TURN_WINDOW_SECS),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.logs.root(), config.pricing.table())
            .with_extension(&config.logs.extension)
            .with_turn_window(config.turns.window())
    }

    pub fn with_extension(mut self, extension: &str) -> Self {
        self.extension = extension.trim_start_matches('.').to_string();
        self
    }

    pub fn with_turn_window(mut self, window: Duration) -> Self {
        self.turn_window = window;
        self
    }

    /// Full re-scan. An unreadable root yields empty aggregates.
    pub fn scan(&self) -> LocalUsage {
        match self.try_scan() {
            Ok(usage) => usage,
            Err(e) => {
                tracing::info!(error = %e, "log directory unavailable, no local usage");
                LocalUsage::default()
            }
        }
    }

    pub fn try_scan(&self) -> Result<LocalUsage, UsageError> {
        let mut usage = LocalUsage::default();

        for project_dir in sorted_entries(&self.root)? {
            if !project_dir.is_dir() {
                continue;
            }
            let Some(raw_name) = project_dir.file_name().and_then(|n| n.to_str()) else {
                continue;
            };

            let project = self.scan_project(&project_dir, &mut usage);
            if project.has_tokens() {
                usage
                    .projects
                    .entry(simplify_project_name(raw_name))
                    .or_default()
                    .merge(&project);
            }
        }

        tracing::debug!(
            months = usage.monthly.len(),
            projects = usage.projects.len(),
            models = usage.models.len(),
            "local scan finished"
        );
        Ok(usage)
    }

    fn scan_project(&self, dir: &Path, usage: &mut LocalUsage) -> TokenBreakdown {
        let mut project = TokenBreakdown::default();

        let files = match sorted_entries(dir) {
            Ok(files) => files,
            Err(e) => {
                tracing::debug!(error = %e, "skipping project");
                return project;
            }
        };

        for path in files {
            if path.extension().and_then(|e| e.to_str()) != Some(self.extension.as_str()) {
                continue;
            }
            if let Err(e) = self.scan_file(&path, &mut project, usage) {
                tracing::debug!(error = %e, "skipping log file");
            }
        }

        project
    }

    fn scan_file(
        &self,
        path: &Path,
        project: &mut TokenBreakdown,
        usage: &mut LocalUsage,
    ) -> Result<(), UsageError> {
        let file = File::open(path).map_err(|e| UsageError::filesystem(path, e))?;
        let events = read_events(BufReader::new(file));

        for turn in TurnSegmenter::with_window(events, self.turn_window) {
            let tokens = turn.tokens();
            let cost = self.pricing.turn_cost(&turn);
            tracing::trace!(events = turn.event_count(), cost, "billed turn");

            if let Some(month) = turn.month_key() {
                usage.monthly.entry(month).or_default().add_turn(&tokens, cost);
            }
            project.add_turn(&tokens, cost);
            usage
                .models
                .entry(turn.model().unwrap_or(UNKNOWN_MODEL).to_string())
                .or_default()
                .add_turn(&tokens, cost);
        }

        Ok(())
    }
}

fn sorted_entries(dir: &Path) -> Result<Vec<PathBuf>, UsageError> {
    let entries = std::fs::read_dir(dir).map_err(|e| UsageError::filesystem(dir, e))?;
    let mut paths: Vec<PathBuf> = entries.flatten().map(|entry| entry.path()).collect();
    paths.sort();
    Ok(paths)
}

/// Decode every non-empty line of a log, silently dropping malformed ones.
pub fn read_events<R: BufRead>(reader: R) -> impl Iterator<Item = UsageEvent> {
    reader
        .lines()
        .map_while(|line| match line {
            Ok(line) => Some(Some(line)),
            // Not UTF-8: skip the line, keep reading
            Err(e) if e.kind() == ErrorKind::InvalidData => Some(None),
            Err(e) => {
                tracing::debug!(error = %e, "stopped reading log file");
                None
            }
        })
        .flatten()
        .filter(|line| !line.trim().is_empty())
        .filter_map(|line| match parse_record(&line) {
            Ok(event) => Some(event),
            Err(e) => {
                tracing::trace!(error = %e, "skipping log line");
                None
            }
        })
}

#[derive(Deserialize)]
struct RawRecord {
    #[serde(default)]
    timestamp: Option<String>,
    #[serde(default)]
    model: Option<String>,
    message: RawMessage,
}

#[derive(Deserialize)]
struct RawMessage {
    role: String,
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    usage: Option<RawUsage>,
}

#[derive(Deserialize)]
struct RawUsage {
    #[serde(default)]
    input_tokens: Option<u64>,
    #[serde(default)]
    output_tokens: Option<u64>,
    #[serde(default)]
    cache_read_input_tokens: Option<u64>,
    #[serde(default)]
    cache_creation_input_tokens: Option<u64>,
    #[serde(default)]
    cache_creation: Option<RawCacheCreation>,
}

#[derive(Deserialize)]
struct RawCacheCreation {
    #[serde(default)]
    ephemeral_5m_input_tokens: Option<u64>,
    #[serde(default)]
    ephemeral_1h_input_tokens: Option<u64>,
}

impl RawUsage {
    /// Flat field wins when non-zero, otherwise the split 5m/1h buckets.
    fn cache_creation_tokens(&self) -> u64 {
        let flat = self.cache_creation_input_tokens.unwrap_or(0);
        if flat != 0 {
            return flat;
        }
        self.cache_creation
            .as_ref()
            .map(|c| {
                c.ephemeral_5m_input_tokens
                    .unwrap_or(0)
                    .saturating_add(c.ephemeral_1h_input_tokens.unwrap_or(0))
            })
            .unwrap_or(0)
    }

    fn counts(&self) -> TokenCounts {
        TokenCounts {
            input: self.input_tokens.unwrap_or(0),
            cache_creation: self.cache_creation_tokens(),
            cache_read: self.cache_read_input_tokens.unwrap_or(0),
            output: self.output_tokens.unwrap_or(0),
        }
    }
}

/// Parse one log line. Lines without a `message.role` are malformed.
pub fn parse_record(line: &str) -> Result<UsageEvent, UsageError> {
    let raw: RawRecord =
        serde_json::from_str(line).map_err(|e| UsageError::MalformedRecord(e.to_string()))?;

    Ok(UsageEvent {
        role: raw.message.role,
        timestamp: raw.timestamp,
        model: raw.model.or(raw.message.model),
        usage: raw.message.usage.as_ref().map(RawUsage::counts),
    })
}

/// Readable project name from a log directory name such as
/// `-Users-alice-Documents-PERSONAL-myapp`.
pub fn simplify_project_name(raw: &str) -> String {
    let segments: Vec<&str> = raw.split('-').collect();

    if let Some(anchor) = segments
        .iter()
        .rposition(|segment| PROJECT_ANCHORS.contains(segment))
    {
        let name = segments[anchor + 1..].join("-");
        if !name.is_empty() {
            return name;
        }
    }

    match segments.last() {
        Some(last) if !last.is_empty() && !HEX_ID.is_match(last) => last.to_string(),
        _ => raw.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_simplify_project_name_after_anchor() {
        assert_eq!(simplify_project_name("-Users-alice-Documents-PERSONAL-myapp"), "myapp");
        assert_eq!(
            simplify_project_name("-Users-alice-Documents-my-cool-app"),
            "my-cool-app"
        );
    }

    #[test]
    fn test_simplify_project_name_fallbacks() {
        assert_eq!(simplify_project_name("-home-bob-code-widget"), "widget");
        assert_eq!(simplify_project_name("-Users-alice-a1b2c3d4"), "-Users-alice-a1b2c3d4");
        assert_eq!(simplify_project_name("-Users-alice-Documents-"), "-Users-alice-Documents-");
        assert_eq!(simplify_project_name("plain"), "plain");
    }

    #[test]
    fn test_parse_record_flat_cache_creation() {
        let line = r#"{"timestamp":"2025-06-01T08:00:00.123Z","message":{"role":"assistant","model":"claude-sonnet-4","usage":{"input_tokens":10,"output_tokens":20,"cache_read_input_tokens":30,"cache_creation_input_tokens":40}}}"#;
        let event = parse_record(line).unwrap();

        assert_eq!(event.role, "assistant");
        assert_eq!(event.model.as_deref(), Some("claude-sonnet-4"));
        assert_eq!(
            event.usage,
            Some(TokenCounts {
                input: 10,
                cache_creation: 40,
                cache_read: 30,
                output: 20,
            })
        );
    }

    #[test]
    fn test_parse_record_nested_cache_creation() {
        let line = r#"{"timestamp":"2025-06-01T08:00:00Z","message":{"role":"assistant","usage":{"input_tokens":1,"output_tokens":2,"cache_creation_input_tokens":0,"cache_creation":{"ephemeral_5m_input_tokens":300,"ephemeral_1h_input_tokens":45}}}}"#;
        let event = parse_record(line).unwrap();
        assert_eq!(event.tokens().cache_creation, 345);
    }

    #[test]
    fn test_parse_record_flat_field_wins_when_non_zero() {
        let line = r#"{"message":{"role":"assistant","usage":{"cache_creation_input_tokens":7,"cache_creation":{"ephemeral_5m_input_tokens":300}}}}"#;
        assert_eq!(parse_record(line).unwrap().tokens().cache_creation, 7);
    }

    #[test]
    fn test_parse_record_prefers_top_level_model() {
        let line = r#"{"model":"outer","message":{"role":"assistant","model":"inner","usage":{}}}"#;
        assert_eq!(parse_record(line).unwrap().model.as_deref(), Some("outer"));
    }

    #[test]
    fn test_parse_record_without_usage_is_not_billable() {
        let line = r#"{"timestamp":"2025-06-01T08:00:00Z","message":{"role":"user","content":[{"type":"tool_result"}]}}"#;
        let event = parse_record(line).unwrap();
        assert!(!event.is_billable());

        let null_usage = r#"{"message":{"role":"assistant","usage":null}}"#;
        assert!(!parse_record(null_usage).unwrap().is_billable());
    }

    #[test]
    fn test_parse_record_rejects_malformed() {
        assert!(parse_record("not json").is_err());
        assert!(parse_record(r#"{"type":"summary","summary":"x"}"#).is_err());
        assert!(parse_record(r#"{"message":{"content":"no role"}}"#).is_err());
        assert!(parse_record(r#"{"message":{"role":"assistant","usage":{"input_tokens":"many"}}}"#).is_err());
    }

    #[test]
    fn test_read_events_skips_bad_lines() {
        let input = concat!(
            r#"{"message":{"role":"assistant","usage":{"input_tokens":1}}}"#,
            "\n\n   \n{broken\n",
            r#"{"message":{"role":"user"}}"#,
            "\n"
        );
        let events: Vec<UsageEvent> = read_events(input.as_bytes()).collect();
        assert_eq!(events.len(), 2);
        assert!(events[0].is_billable());
        assert!(!events[1].is_billable());
    }

    #[test]
    fn test_missing_root_yields_empty_usage() {
        let scanner = LocalScanner::new("/definitely/not/here", PricingTable::default());
        assert!(scanner.scan().is_empty());
        assert!(scanner.try_scan().is_err());
    }
}
