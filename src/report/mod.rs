use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;

use crate::config::Language;
use crate::usage::pricing::RateCard;
use crate::usage::reconcile::UsageSnapshot;
use crate::usage::types::UsageEntry;

const MONTHS_ES: [&str; 12] = [
    "enero",
    "febrero",
    "marzo",
    "abril",
    "mayo",
    "junio",
    "julio",
    "agosto",
    "septiembre",
    "octubre",
    "noviembre",
    "diciembre",
];

/// Key space a report is grouped by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ReportGroup {
    Month,
    Project,
    Model,
}

impl ReportGroup {
    pub fn label(&self) -> &'static str {
        match self {
            ReportGroup::Month => "Month",
            ReportGroup::Project => "Project",
            ReportGroup::Model => "Model",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Category {
    Input,
    #[serde(rename = "Cache Creation")]
    CacheCreation,
    #[serde(rename = "Cache Read")]
    CacheRead,
    Output,
    #[serde(rename = "TOTAL")]
    Total,
}

impl Category {
    pub fn label(&self) -> &'static str {
        match self {
            Category::Input => "Input",
            Category::CacheCreation => "Cache Creation",
            Category::CacheRead => "Cache Read",
            Category::Output => "Output",
            Category::Total => "TOTAL",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReportRow {
    /// Display label of the group, e.g. a localized month name.
    pub group: String,
    pub key: String,
    pub category: Category,
    /// `None` on TOTAL rows.
    pub tokens: Option<u64>,
    pub cost: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Report {
    pub group: ReportGroup,
    pub rows: Vec<ReportRow>,
    pub grand_total: f64,
}

impl Report {
    /// Five rows per entry: four categories and the entry's TOTAL.
    ///
    /// Category costs come from the entry's estimates when present, otherwise
    /// from `standard`. TOTAL is the entry's accumulated cost, so categories
    /// of locally priced long-context turns need not sum to it.
    pub fn build(
        entries: &[UsageEntry],
        group: ReportGroup,
        standard: &RateCard,
        language: Language,
    ) -> Self {
        let mut rows = Vec::with_capacity(entries.len() * 5);
        let mut grand_total = 0.0;

        for entry in entries {
            let label = match group {
                ReportGroup::Month => format_month(&entry.key, language),
                _ => entry.key.clone(),
            };
            let details = &entry.details;
            let costs = details
                .estimated
                .unwrap_or_else(|| standard.category_costs(&details.tokens()));

            let categories = [
                (Category::Input, details.input_tokens, costs.input),
                (Category::CacheCreation, details.cache_creation_tokens, costs.cache_creation),
                (Category::CacheRead, details.cache_read_tokens, costs.cache_read),
                (Category::Output, details.output_tokens, costs.output),
            ];
            for (category, tokens, cost) in categories {
                rows.push(ReportRow {
                    group: label.clone(),
                    key: entry.key.clone(),
                    category,
                    tokens: Some(tokens),
                    cost,
                });
            }

            rows.push(ReportRow {
                group: label,
                key: entry.key.clone(),
                category: Category::Total,
                tokens: None,
                cost: entry.cost,
            });
            grand_total += entry.cost;
        }

        Self {
            group,
            rows,
            grand_total,
        }
    }

    pub fn from_snapshot(
        snapshot: &UsageSnapshot,
        group: ReportGroup,
        standard: &RateCard,
        language: Language,
    ) -> Self {
        Self::build(snapshot.entries(group), group, standard, language)
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// CSV with one blank line after each group and a final GRAND TOTAL row.
    pub fn to_csv(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "{},Token Type,Tokens,Cost ($)", self.group.label());

        for row in &self.rows {
            let tokens = row
                .tokens
                .map(|t| t.to_string())
                .unwrap_or_else(|| "-".to_string());
            let _ = writeln!(
                out,
                "{},{},{},{:.2}",
                csv_quote(&row.group),
                row.category.label(),
                tokens,
                row.cost
            );
            if row.category == Category::Total {
                out.push('\n');
            }
        }

        let _ = writeln!(out, "GRAND TOTAL,-,-,{:.2}", self.grand_total);
        out
    }

    /// Markdown table for terminal rendering.
    pub fn to_markdown(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "|{}|Category|Tokens|Cost|", self.group.label());
        out.push_str("|:-|:-|-:|-:|\n");

        for row in &self.rows {
            let (group, category, cost) = if row.category == Category::Total {
                (
                    format!("**{}**", md_cell(&row.group)),
                    "**TOTAL**".to_string(),
                    format!("**${:.2}**", row.cost),
                )
            } else {
                (
                    md_cell(&row.group),
                    row.category.label().to_string(),
                    format!("${:.2}", row.cost),
                )
            };
            let tokens = row.tokens.map(format_tokens).unwrap_or_else(|| "-".to_string());
            let _ = writeln!(out, "|{}|{}|{}|{}|", group, category, tokens, cost);
        }

        let _ = writeln!(out, "|**Grand Total**||-|**${:.2}**|", self.grand_total);
        out
    }
}

/// `2025-03` as "March 2025" or "marzo 2025". Unparsable keys are returned as-is.
pub fn format_month(key: &str, language: Language) -> String {
    let Ok(date) = NaiveDate::parse_from_str(&format!("{}-01", key), "%Y-%m-%d") else {
        return key.to_string();
    };
    match language {
        Language::En => date.format("%B %Y").to_string(),
        Language::Es => format!("{} {}", MONTHS_ES[date.month0() as usize], date.year()),
    }
}

/// `1234567` as "1,234,567".
pub fn format_tokens(count: u64) -> String {
    let digits = count.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(c);
    }
    out
}

fn csv_quote(field: &str) -> String {
    format!("\"{}\"", field.replace('"', "\"\""))
}

fn md_cell(text: &str) -> String {
    text.replace('|', "\\|")
}
