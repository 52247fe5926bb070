//! Persistent engine state: the atomic JSON store plus the tombstone,
//! unresolved, blackbox and phantom ledgers layered on top of it.

pub mod blackbox;
pub mod phantoms;
pub mod scope;
pub mod skipped;
pub mod store;
pub mod tombstones;
pub mod unresolved;

pub use blackbox::{AttemptSummary, BlackboxEntry, BlackboxStore, FlapRow};
pub use phantoms::PhantomGuard;
pub use scope::safe_scope;
pub use store::{
    Baseline, FeatureRecord, Index, LastSyncDocument, RunTotals, StateDocument, StateStore,
    TombstoneDocument,
};
pub use tombstones::pair_key;
pub use unresolved::{UnresolvedRecord, UnresolvedStore};

/// Current wall-clock time as epoch seconds.
pub fn now_epoch() -> i64 {
    chrono::Utc::now().timestamp()
}
