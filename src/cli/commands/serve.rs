use anyhow::Result;
use colored::Colorize;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

use crate::cli::GlobalArgs;
use crate::server::{self, AppState};
use crate::usage::{DataSource, UsageSnapshot, UsageTracker};

/// Serve usage data over HTTP until interrupted
pub async fn run(global: &GlobalArgs, port: Option<u16>, open_browser: bool) -> Result<()> {
    let config = global.load_config();
    let port = port.unwrap_or(config.server.port);
    let interval = Duration::from_secs(config.server.refresh_interval_secs.max(1));

    let reconciler = global.reconciler(&config);
    if !reconciler.has_remote() {
        eprintln!("[usage] No API key configured, serving costs from local logs");
    }
    let tracker = UsageTracker::new(reconciler);
    let state = Arc::new(AppState::new(config, tracker));
    let reporter = spawn_update_reporter(&state);
    let refresher = server::spawn_refresher(state.clone(), interval);

    let addr = SocketAddr::from(([127, 0, 0, 1], port));
    let url = format!("http://{}/api/usage", addr);
    eprintln!(
        "[usage] Serving on {} (refresh every {}s)",
        url.bright_cyan(),
        interval.as_secs()
    );

    if open_browser {
        if let Err(e) = open::that(&url) {
            eprintln!("[usage] Failed to open browser: {}", e);
        }
    }

    let result = tokio::select! {
        result = server::serve(state, addr) => result,
        _ = tokio::signal::ctrl_c() => {
            eprintln!("\n[usage] Shutting down");
            Ok(())
        }
    };

    refresher.abort();
    reporter.abort();
    result
}

/// Print a status line each time a new snapshot is published.
fn spawn_update_reporter(state: &AppState) -> JoinHandle<()> {
    let mut updates = state.tracker.subscribe();
    tokio::spawn(async move {
        while updates.changed().await.is_ok() {
            let line = updates.borrow_and_update().as_ref().map(|s| status_line(s));
            if let Some(line) = line {
                eprintln!("{}", line);
            }
        }
    })
}

fn status_line(snapshot: &UsageSnapshot) -> String {
    let source = match snapshot.source {
        DataSource::Api => "API data",
        DataSource::Local => "local logs",
    };
    format!(
        "[usage] Updated #{}: ${:.2} this month, ${:.2} overall ({})",
        snapshot.generation, snapshot.current_month_cost, snapshot.total_cost, source
    )
}
