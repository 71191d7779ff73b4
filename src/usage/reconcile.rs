use chrono::{DateTime, Local, NaiveDate, Utc};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::watch;

use super::pricing::RateCard;
use super::remote::{AccountInfo, RemoteClient, RemoteUsage};
use super::scanner::{LocalScanner, LocalUsage};
use super::types::{cost_ranked_entries, month_entries, DataSource, UsageEntry};
use crate::config::Config;
use crate::error::RemoteError;

/// Where a pass is in choosing between remote and local data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReconcileState {
    NoCredential,
    Fetching,
    RemoteOk,
    RemoteFailed,
}

/// Immutable result of one aggregation pass.
#[derive(Debug, Clone, Serialize)]
pub struct UsageSnapshot {
    /// Monotonic pass number assigned by [`UsageTracker`]; 0 when run directly.
    pub generation: u64,
    pub source: DataSource,
    pub state: ReconcileState,
    /// States visited during the pass, in order.
    pub transitions: Vec<ReconcileState>,
    pub monthly: Vec<UsageEntry>,
    pub projects: Vec<UsageEntry>,
    pub models: Vec<UsageEntry>,
    pub current_month: String,
    pub current_month_cost: f64,
    pub total_cost: f64,
    pub today_spend: Option<f64>,
    pub account: Option<AccountInfo>,
    pub generated_at: DateTime<Utc>,
}

impl UsageSnapshot {
    pub fn entries(&self, group: crate::report::ReportGroup) -> &[UsageEntry] {
        use crate::report::ReportGroup;
        match group {
            ReportGroup::Month => &self.monthly,
            ReportGroup::Project => &self.projects,
            ReportGroup::Model => &self.models,
        }
    }
}

struct RemoteOutcome {
    usage: RemoteUsage,
    account: AccountInfo,
    today_spend: f64,
}

/// Runs one pass: remote data when a credential is configured and every
/// remote read succeeds, local logs otherwise. Projects always come from the
/// local logs.
#[derive(Debug, Clone)]
pub struct Reconciler {
    scanner: LocalScanner,
    remote: Option<RemoteClient>,
    standard: RateCard,
    window_months: u32,
}

impl Reconciler {
    pub fn new(scanner: LocalScanner, remote: Option<RemoteClient>, config: &Config) -> Self {
        Self {
            scanner,
            remote,
            standard: config.pricing.standard,
            window_months: config.remote.window_months,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        let remote = match RemoteClient::from_config(&config.remote) {
            Ok(client) => Some(client),
            Err(RemoteError::MissingCredential) => None,
            Err(e) => {
                tracing::warn!(error = %e, "remote usage disabled");
                None
            }
        };
        Self::new(LocalScanner::from_config(config), remote, config)
    }

    /// Ignore any credential and use only the local logs.
    pub fn local_only(mut self) -> Self {
        self.remote = None;
        self
    }

    pub fn has_remote(&self) -> bool {
        self.remote.is_some()
    }

    pub async fn run(&self) -> UsageSnapshot {
        self.run_on(Local::now().date_naive()).await
    }

    /// Run a pass as if today were `today`.
    pub async fn run_on(&self, today: NaiveDate) -> UsageSnapshot {
        let mut transitions = Vec::new();

        let Some(client) = &self.remote else {
            enter(&mut transitions, ReconcileState::NoCredential);
            let local = self.scan_local().await;
            return local_snapshot(local, today, transitions);
        };

        enter(&mut transitions, ReconcileState::Fetching);
        let local = self.spawn_local_scan();
        let remote = self.fetch_remote(client, today).await;
        let local = join_local_scan(local).await;

        match remote {
            Ok(outcome) => {
                enter(&mut transitions, ReconcileState::RemoteOk);
                remote_snapshot(outcome, local, today, transitions)
            }
            Err(e) => {
                tracing::warn!(error = %e, "remote usage failed, falling back to local logs");
                enter(&mut transitions, ReconcileState::RemoteFailed);
                local_snapshot(local, today, transitions)
            }
        }
    }

    async fn fetch_remote(
        &self,
        client: &RemoteClient,
        today: NaiveDate,
    ) -> Result<RemoteOutcome, RemoteError> {
        let (usage, account, today_spend) = tokio::try_join!(
            client.fetch_usage(today, self.window_months, &self.standard),
            client.fetch_account_info(),
            client.fetch_today_spend(today),
        )?;

        Ok(RemoteOutcome {
            usage,
            account,
            today_spend,
        })
    }

    fn spawn_local_scan(&self) -> tokio::task::JoinHandle<LocalUsage> {
        let scanner = self.scanner.clone();
        tokio::task::spawn_blocking(move || scanner.scan())
    }

    async fn scan_local(&self) -> LocalUsage {
        join_local_scan(self.spawn_local_scan()).await
    }
}

async fn join_local_scan(handle: tokio::task::JoinHandle<LocalUsage>) -> LocalUsage {
    match handle.await {
        Ok(usage) => usage,
        Err(e) => {
            tracing::warn!(error = %e, "local scan task failed");
            LocalUsage::default()
        }
    }
}

fn enter(transitions: &mut Vec<ReconcileState>, state: ReconcileState) {
    tracing::info!(?state, "reconcile state");
    transitions.push(state);
}

fn local_snapshot(
    local: LocalUsage,
    today: NaiveDate,
    transitions: Vec<ReconcileState>,
) -> UsageSnapshot {
    let monthly = local.monthly_entries();
    let projects = local.project_entries();
    let models = local.model_entries();
    assemble(DataSource::Local, monthly, projects, models, None, None, today, transitions)
}

fn remote_snapshot(
    outcome: RemoteOutcome,
    local: LocalUsage,
    today: NaiveDate,
    transitions: Vec<ReconcileState>,
) -> UsageSnapshot {
    let monthly = month_entries(outcome.usage.monthly);
    let models = cost_ranked_entries(outcome.usage.models);
    assemble(
        DataSource::Api,
        monthly,
        local.project_entries(),
        models,
        Some(outcome.today_spend),
        Some(outcome.account),
        today,
        transitions,
    )
}

#[allow(clippy::too_many_arguments)]
fn assemble(
    source: DataSource,
    monthly: Vec<UsageEntry>,
    projects: Vec<UsageEntry>,
    models: Vec<UsageEntry>,
    today_spend: Option<f64>,
    account: Option<AccountInfo>,
    today: NaiveDate,
    transitions: Vec<ReconcileState>,
) -> UsageSnapshot {
    let current_month = today.format("%Y-%m").to_string();
    let current_month_cost = monthly
        .iter()
        .find(|entry| entry.key == current_month)
        .map(|entry| entry.cost)
        .unwrap_or(0.0);
    let total_cost = monthly.iter().map(|entry| entry.cost).sum();
    let state = transitions
        .last()
        .copied()
        .unwrap_or(ReconcileState::NoCredential);

    tracing::info!(
        ?source,
        months = monthly.len(),
        projects = projects.len(),
        models = models.len(),
        total_cost,
        "usage pass complete"
    );

    UsageSnapshot {
        generation: 0,
        source,
        state,
        transitions,
        monthly,
        projects,
        models,
        current_month,
        current_month_cost,
        total_cost,
        today_spend,
        account,
        generated_at: Utc::now(),
    }
}

/// Owns the published snapshot.
///
/// Passes may overlap; each builds its own aggregates and only the most
/// recently started one that has finished is published. A pass that finishes
/// after a newer one is discarded.
pub struct UsageTracker {
    reconciler: Reconciler,
    next_generation: AtomicU64,
    published: watch::Sender<Option<Arc<UsageSnapshot>>>,
}

impl UsageTracker {
    pub fn new(reconciler: Reconciler) -> Self {
        let (published, _) = watch::channel(None);
        Self {
            reconciler,
            next_generation: AtomicU64::new(0),
            published,
        }
    }

    /// Run a pass and publish it unless a newer pass already has.
    pub async fn refresh(&self) -> Arc<UsageSnapshot> {
        let generation = self.next_generation.fetch_add(1, Ordering::SeqCst) + 1;
        let mut snapshot = self.reconciler.run().await;
        snapshot.generation = generation;
        let snapshot = Arc::new(snapshot);

        self.publish(snapshot.clone());
        snapshot
    }

    fn publish(&self, snapshot: Arc<UsageSnapshot>) -> bool {
        self.published.send_if_modified(|current| {
            let newer = current
                .as_ref()
                .map_or(true, |published| published.generation < snapshot.generation);
            if newer {
                *current = Some(snapshot.clone());
            } else {
                tracing::debug!(generation = snapshot.generation, "discarding superseded pass");
            }
            newer
        })
    }

    pub fn latest(&self) -> Option<Arc<UsageSnapshot>> {
        self.published.borrow().clone()
    }

    /// Receiver that wakes on every published snapshot.
    pub fn subscribe(&self) -> watch::Receiver<Option<Arc<UsageSnapshot>>> {
        self.published.subscribe()
    }
}
