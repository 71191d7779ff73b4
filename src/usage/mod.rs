pub mod pricing;
pub mod reconcile;
pub mod remote;
pub mod scanner;
pub mod turns;
pub mod types;

pub use pricing::{PricingTable, RateCard};
pub use reconcile::{ReconcileState, Reconciler, UsageSnapshot, UsageTracker};
pub use remote::{AccountInfo, RemoteClient, RemoteUsage};
pub use scanner::{LocalScanner, LocalUsage};
pub use turns::TurnSegmenter;
pub use types::{DataSource, TokenBreakdown, TokenCounts, Turn, UsageEntry, UsageEvent};
