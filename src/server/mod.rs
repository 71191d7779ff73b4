pub mod dto;
pub mod handlers;
pub mod router;

pub use handlers::AppState;
pub use router::create_router;

use anyhow::{Context, Result};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

/// Refresh the published snapshot every `every`, starting immediately.
pub fn spawn_refresher(state: Arc<AppState>, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let snapshot = state.tracker.refresh().await;
            tracing::debug!(generation = snapshot.generation, "background refresh done");
        }
    })
}

pub async fn serve(state: Arc<AppState>, addr: SocketAddr) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    axum::serve(listener, create_router(state))
        .await
        .context("Server error")
}
