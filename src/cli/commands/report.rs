use anyhow::{Context, Result};
use std::fs;
use std::path::PathBuf;

use crate::cli::{GlobalArgs, ReportFormat};
use crate::report::{Report, ReportGroup};

/// Print or export the cost breakdown grouped by `by`
pub async fn run(
    global: &GlobalArgs,
    by: ReportGroup,
    format: ReportFormat,
    output: Option<PathBuf>,
) -> Result<()> {
    let config = global.load_config();
    let snapshot = global.reconciler(&config).run().await;
    let report = Report::from_snapshot(
        &snapshot,
        by,
        &config.pricing.standard,
        config.display.language,
    );

    let rendered = match format {
        ReportFormat::Csv => report.to_csv(),
        ReportFormat::Json => {
            serde_json::to_string_pretty(&report).context("Failed to serialize report")?
        }
        ReportFormat::Table => {
            if output.is_none() {
                termimad::print_text(&report.to_markdown());
                return Ok(());
            }
            report.to_markdown()
        }
    };

    match output {
        Some(path) => {
            fs::write(&path, rendered)
                .with_context(|| format!("Failed to write report to {}", path.display()))?;
            eprintln!("[usage] Report written to {}", path.display());
        }
        None => print!("{}", rendered),
    }

    Ok(())
}
