use anyhow::Result;
use colored::Colorize;

use crate::cli::GlobalArgs;
use crate::config::Language;
use crate::report::{format_month, format_tokens};
use crate::usage::{DataSource, ReconcileState, UsageEntry, UsageSnapshot};

const TOP_N: usize = 5;

/// Run a usage pass and print an overview
pub async fn run(global: &GlobalArgs) -> Result<()> {
    let config = global.load_config();
    let reconciler = global.reconciler(&config);

    eprintln!("[usage] Reading {}", config.logs.root().display());
    let snapshot = reconciler.run().await;

    print_summary(&snapshot, config.display.language);
    Ok(())
}

fn print_summary(snapshot: &UsageSnapshot, language: Language) {
    println!("\n{}", "  Claude Code Usage".bold().bright_yellow());
    println!("{}", "  ─────────────────────────────".dimmed());

    let source = match snapshot.source {
        DataSource::Api => "API data".green(),
        DataSource::Local => "Local data".yellow(),
    };
    println!("  {} {}", "Source:".bold(), source);
    if snapshot.state == ReconcileState::RemoteFailed {
        println!(
            "  {}",
            "API unavailable, showing costs computed from local logs".red()
        );
    }

    if snapshot.monthly.is_empty() && snapshot.projects.is_empty() {
        println!("\n  No usage found.\n");
        return;
    }

    println!(
        "\n  {} {}",
        format!("{}:", format_month(&snapshot.current_month, language)).bold(),
        format!("${:.2}", snapshot.current_month_cost).bright_yellow()
    );
    println!(
        "  {} {}",
        "All months:".bold(),
        format!("${:.2}", snapshot.total_cost).bright_yellow()
    );
    if let Some(today) = snapshot.today_spend {
        println!("  {} {}", "Today:".bold(), format!("${:.2}", today).bright_yellow());
    }

    if let Some(account) = &snapshot.account {
        let budget = account
            .max_budget
            .map(|b| format!("${:.2} / ${:.2}", account.spend, b))
            .unwrap_or_else(|| format!("${:.2}", account.spend));
        println!("  {} {}", "Budget:".bold(), budget.cyan());
        if let Some(reset) = account.budget_reset_at {
            println!(
                "  {} {}",
                "Resets:".bold(),
                reset.format("%Y-%m-%d %H:%M UTC").to_string().dimmed()
            );
        }
    }

    if !snapshot.monthly.is_empty() {
        println!("\n  {}", "Months:".bold());
        for entry in snapshot.monthly.iter().take(TOP_N) {
            print_entry(&format_month(&entry.key, language), entry);
        }
    }

    if !snapshot.projects.is_empty() {
        println!("\n  {}", "Top Projects:".bold());
        for entry in snapshot.projects.iter().take(TOP_N) {
            print_entry(&entry.key, entry);
        }
    }

    if !snapshot.models.is_empty() {
        println!("\n  {}", "Top Models:".bold());
        for entry in snapshot.models.iter().take(TOP_N) {
            print_entry(&entry.key, entry);
        }
    }

    println!();
}

fn print_entry(label: &str, entry: &UsageEntry) {
    let tokens = entry.details.tokens().total();
    println!(
        "    {} {} {}",
        format!("{:>28}", label).cyan(),
        format!("{:>10}", format!("${:.2}", entry.cost)).bright_yellow(),
        format!("{} tokens", format_tokens(tokens)).dimmed()
    );
}
