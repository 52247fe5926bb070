use std::sync::Arc;
use std::time::Duration;

use medley_config::{Config, SyncFeature};

use crate::engine::snapshots::SnapshotCache;
use crate::events::Emitter;
use crate::registry::ProviderRegistry;
use crate::state::blackbox::BlackboxStore;
use crate::state::store::StateStore;
use crate::state::unresolved::UnresolvedStore;
use crate::telemetry::Stats;

/// Everything a driver invocation needs, threaded explicitly instead of
/// living in ambient globals.
pub struct SyncContext {
    pub config: Config,
    pub providers: ProviderRegistry,
    pub emitter: Emitter,
    pub store: StateStore,
    pub unresolved: UnresolvedStore,
    pub blackbox: BlackboxStore,
    pub stats: Arc<dyn Stats>,
    pub snapshots: SnapshotCache,
    pub dry_run: bool,
    pub only_feature: Option<SyncFeature>,
}

impl std::fmt::Debug for SyncContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncContext")
            .field("providers", &self.providers.names())
            .field("dry_run", &self.dry_run)
            .field("only_feature", &self.only_feature)
            .finish()
    }
}

impl SyncContext {
    /// Snapshot memoization TTL from the runtime knobs.
    pub fn snapshot_ttl(&self) -> Duration {
        Duration::from_secs(self.config.runtime.snapshot_ttl_sec)
    }

    /// Dry-run when either the call or the sync config says so.
    pub fn dry_run_effective(&self) -> bool {
        self.dry_run || self.config.sync.dry_run
    }

    /// The optional deployment scope label for pair cache files.
    pub fn pair_scope(&self) -> Option<&str> {
        self.config.runtime.pair_scope.as_deref()
    }
}
