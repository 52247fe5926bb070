//! Core synchronization engine for Medley.
//!
//! Reconciles user-scoped media inventories (watchlists, ratings, history,
//! playlists) across heterogeneous providers: snapshot collection with a
//! suspect-shrink guard, minimal add/remove planning, tombstone and
//! blackbox blocklists, a phantom guard against add churn, chunked retried
//! write application with pessimistic counting, and atomic JSON state.

pub mod context;
pub mod engine;
pub mod error;
pub mod events;
pub mod facade;
pub mod registry;
pub mod state;
pub mod telemetry;

pub use context::SyncContext;
pub use engine::applier::ChunkedOutcome;
pub use engine::metrics::{ApiMetrics, ApiTotals};
pub use engine::oneway::{OneWayOutcome, run_one_way_feature};
pub use engine::pairs::{RunSummary, run_pairs};
pub use engine::planner::{diff, diff_ratings, ratings_filter_index};
pub use engine::snapshots::{SnapshotCache, build_snapshots_for_feature, coerce_suspect_snapshot};
pub use engine::twoway::{TwoWayOutcome, run_two_way_feature};
pub use error::{Result, SyncError};
pub use events::{Emitter, ProgressFn};
pub use facade::{Orchestrator, RunOptions};
pub use registry::ProviderRegistry;
pub use state::{
    Index, LastSyncDocument, PhantomGuard, RunTotals, StateDocument, StateStore, pair_key,
};
pub use telemetry::{NoopStats, Stats};
