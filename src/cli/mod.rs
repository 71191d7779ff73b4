pub mod commands;

use anyhow::Result;
use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

use crate::config::{load_config_from, Config};
use crate::report::ReportGroup;
use crate::usage::Reconciler;

/// Token usage and cost statistics for Claude Code logs
#[derive(Parser, Debug)]
#[command(name = "usage-tracker", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    #[command(flatten)]
    pub global: GlobalArgs,
}

#[derive(Args, Debug, Clone, Default)]
pub struct GlobalArgs {
    /// Config file to use instead of the platform default
    #[arg(long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Root of the conversation log tree
    #[arg(long, global = true, value_name = "DIR")]
    pub logs_dir: Option<PathBuf>,

    /// Ignore any API key and read only local logs
    #[arg(long, global = true)]
    pub local_only: bool,

    /// LiteLLM API key, used when the config file has none
    #[arg(long, global = true, env = "USAGE_TRACKER_API_KEY", hide_env_values = true)]
    pub api_key: Option<String>,

    /// Verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

impl GlobalArgs {
    /// Config file contents with command-line overrides applied.
    pub fn load_config(&self) -> Config {
        let mut config = load_config_from(self.config.as_deref());

        if let Some(dir) = &self.logs_dir {
            config.logs.path = dir.to_string_lossy().into_owned();
        }
        if config.remote.credential().is_none() {
            if let Some(key) = &self.api_key {
                config.remote.api_key = key.clone();
            }
        }

        config
    }

    pub fn reconciler(&self, config: &Config) -> Reconciler {
        let reconciler = Reconciler::from_config(config);
        if self.local_only {
            reconciler.local_only()
        } else {
            reconciler
        }
    }
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Show this month's cost, totals and the top projects and models
    Summary,

    /// Print or export the cost breakdown
    Report {
        /// Group rows by month, project or model
        #[arg(long, value_enum, default_value = "month")]
        by: ReportGroup,

        /// Output format
        #[arg(long, value_enum, default_value = "table")]
        format: ReportFormat,

        /// Write to a file instead of stdout
        #[arg(short, long, value_name = "FILE")]
        output: Option<PathBuf>,
    },

    /// Serve usage data over HTTP with periodic refresh
    Serve {
        /// Port to listen on
        #[arg(short, long)]
        port: Option<u16>,

        /// Open the usage endpoint in a browser
        #[arg(long)]
        open: bool,
    },

    /// Inspect or change configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Print the effective configuration
    Show,
    /// Print the config file location
    Path,
    /// Restore the default rate cards
    ResetPricing,
    /// Store the LiteLLM API key (prompts when omitted)
    SetKey { key: Option<String> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ReportFormat {
    Table,
    Csv,
    Json,
}

pub async fn run(cli: Cli) -> Result<()> {
    let global = cli.global;
    match cli.command {
        Commands::Summary => commands::summary::run(&global).await,
        Commands::Report { by, format, output } => {
            commands::report::run(&global, by, format, output).await
        }
        Commands::Serve { port, open } => commands::serve::run(&global, port, open).await,
        Commands::Config { action } => commands::config::run(&global, action).await,
    }
}
