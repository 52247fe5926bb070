use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;

use serde_json::json;

use medley_config::{Config, SyncFeature};
use medley_contracts::MediaAdapter;
use medley_model::canonical_key;

use crate::context::SyncContext;
use crate::engine::pairs::{RunSummary, run_pairs};
use crate::engine::snapshots::{SnapshotCache, build_snapshots_for_feature};
use crate::events::{Emitter, ProgressFn};
use crate::registry::ProviderRegistry;
use crate::state::blackbox::BlackboxStore;
use crate::state::store::{StateStore, write_atomic};
use crate::state::unresolved::UnresolvedStore;
use crate::state::now_epoch;
use crate::telemetry::{NoopStats, Stats, maybe_emit_rate_warnings};

/// Options for one [`Orchestrator::run`] invocation.
#[derive(Clone, Default)]
pub struct RunOptions {
    pub dry_run: bool,
    pub only_feature: Option<SyncFeature>,
    /// Skip the post-run baseline/wall refresh when false.
    pub write_state: bool,
    /// Additional path to mirror the final state document to.
    pub state_path: Option<PathBuf>,
    /// Per-run progress callback override.
    pub progress: Option<ProgressFn>,
}

impl std::fmt::Debug for RunOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunOptions")
            .field("dry_run", &self.dry_run)
            .field("only_feature", &self.only_feature)
            .field("write_state", &self.write_state)
            .field("state_path", &self.state_path)
            .finish()
    }
}

impl RunOptions {
    pub fn new() -> RunOptions {
        RunOptions { write_state: true, ..Default::default() }
    }

    pub fn dry_run(mut self, dry_run: bool) -> RunOptions {
        self.dry_run = dry_run;
        self
    }

    pub fn only_feature(mut self, feature: SyncFeature) -> RunOptions {
        self.only_feature = Some(feature);
        self
    }

    pub fn progress(mut self, progress: ProgressFn) -> RunOptions {
        self.progress = Some(progress);
        self
    }
}

/// Stable entry point of the synchronization engine.
///
/// Owns the configuration, the provider registry, the state stores and the
/// shared caches; [`Orchestrator::run`] drives one full cycle across every
/// enabled pair.
#[derive(Debug)]
pub struct Orchestrator {
    ctx: SyncContext,
}

impl Orchestrator {
    pub fn new(
        config: Config,
        adapters: impl IntoIterator<Item = Arc<dyn MediaAdapter>>,
        state_base: impl Into<PathBuf>,
    ) -> Orchestrator {
        Orchestrator::with_progress(config, adapters, state_base, None)
    }

    pub fn with_progress(
        config: Config,
        adapters: impl IntoIterator<Item = Arc<dyn MediaAdapter>>,
        state_base: impl Into<PathBuf>,
        on_progress: Option<ProgressFn>,
    ) -> Orchestrator {
        let store = StateStore::new(state_base);
        let cache_dir = store.cache_dir();
        let emitter = Emitter::new(on_progress, config.runtime.debug);
        let blackbox = BlackboxStore::new(&cache_dir, config.sync.blackbox.clone());
        let ctx = SyncContext {
            providers: ProviderRegistry::new(adapters),
            emitter,
            store,
            unresolved: UnresolvedStore::new(&cache_dir),
            blackbox,
            stats: Arc::new(NoopStats),
            snapshots: SnapshotCache::default(),
            dry_run: false,
            only_feature: None,
            config,
        };
        ctx.emitter.info("[i] Orchestrator ready");
        Orchestrator { ctx }
    }

    /// Install a telemetry sink.
    pub fn set_stats(&mut self, stats: Arc<dyn Stats>) {
        self.ctx.stats = stats;
    }

    pub fn config(&self) -> &Config {
        &self.ctx.config
    }

    pub fn store(&self) -> &StateStore {
        &self.ctx.store
    }

    /// Run one synchronization cycle.
    pub async fn run(&mut self, options: RunOptions) -> RunSummary {
        let previous_cb = match options.progress.clone() {
            Some(progress) => Some(self.ctx.emitter.set_callback(Some(progress))),
            None => None,
        };

        self.ctx.dry_run = options.dry_run;
        self.ctx.only_feature = options.only_feature;

        let summary = run_pairs(&self.ctx).await;

        if options.write_state && !self.ctx.dry_run_effective() {
            let features = self.enabled_features();
            self.persist_feature_baselines(&features).await;
            self.persist_state_wall();
        }
        self.ctx.store.clear_watchlist_hide();
        self.ctx.emitter.dbg(
            "hidefile.cleared",
            json!({ "feature": "watchlist", "scope": "end-of-run" }),
        );

        let http = self.ctx.stats.http_overview(24);
        if http.as_object().map(|o| !o.is_empty()).unwrap_or(false) {
            self.ctx
                .emitter
                .emit("http:overview", json!({ "window_hours": 24, "data": http }));
        }
        let state = self.ctx.store.load_state();
        let overview = self.ctx.stats.overview(&state);
        self.ctx
            .emitter
            .emit("stats:overview", json!({ "overview": overview }));

        if let Some(path) = &options.state_path {
            write_atomic(path, &state);
        }

        if let Some(previous) = previous_cb {
            self.ctx.emitter.set_callback(previous);
        }
        summary
    }

    /// Run a single pair configuration without touching the others.
    pub async fn run_pair(
        &mut self,
        pair: medley_config::PairConfig,
        options: RunOptions,
    ) -> RunSummary {
        let saved_pairs = std::mem::take(&mut self.ctx.config.pairs);
        let only = pair
            .feature
            .as_deref()
            .and_then(SyncFeature::parse)
            .or(options.only_feature);
        self.ctx.config.pairs = vec![pair];

        let summary = self
            .run(RunOptions { only_feature: only, ..options })
            .await;

        self.ctx.config.pairs = saved_pairs;
        summary
    }

    /// Prune tombstones older than the given age.
    pub fn prune_tombstones(&self, older_than_secs: i64) -> usize {
        crate::state::tombstones::prune(&self.ctx.store, &self.ctx.emitter, older_than_secs)
    }

    /// Emit `rate:low` warnings from the stats backend's overview.
    pub fn emit_rate_warnings(&self) {
        maybe_emit_rate_warnings(
            self.ctx.stats.as_ref(),
            &self.ctx.emitter,
            &self.ctx.config.telemetry.warn_rate_remaining,
        );
    }

    /// Apply additions directly to one destination, outside a pair cycle.
    pub async fn apply_add(
        &self,
        dst: &str,
        feature: SyncFeature,
        items: &[medley_model::MediaItem],
        dry_run: Option<bool>,
    ) -> crate::error::Result<crate::engine::applier::ChunkedOutcome> {
        let dst = dst.trim().to_ascii_uppercase();
        let ops = self
            .ctx
            .providers
            .get(&dst)
            .ok_or_else(|| crate::error::SyncError::UnknownProvider(dst.clone()))?;
        let res = crate::engine::applier::apply_add(
            ops.as_ref(),
            &self.ctx.config,
            &dst,
            feature,
            items,
            dry_run.unwrap_or(self.ctx.dry_run),
            &self.ctx.emitter,
            &self.ctx.unresolved,
            self.ctx.config.runtime.chunk_size_for(&dst),
            self.ctx.config.runtime.apply_chunk_pause_ms,
        )
        .await?;
        Ok(res)
    }

    /// Apply removals directly to one destination, outside a pair cycle.
    pub async fn apply_remove(
        &self,
        dst: &str,
        feature: SyncFeature,
        items: &[medley_model::MediaItem],
        dry_run: Option<bool>,
    ) -> crate::error::Result<crate::engine::applier::ChunkedOutcome> {
        let dst = dst.trim().to_ascii_uppercase();
        let ops = self
            .ctx
            .providers
            .get(&dst)
            .ok_or_else(|| crate::error::SyncError::UnknownProvider(dst.clone()))?;
        let res = crate::engine::applier::apply_remove(
            ops.as_ref(),
            &self.ctx.config,
            &dst,
            feature,
            items,
            dry_run.unwrap_or(self.ctx.dry_run),
            &self.ctx.emitter,
            &self.ctx.unresolved,
            self.ctx.config.runtime.chunk_size_for(&dst),
            self.ctx.config.runtime.apply_chunk_pause_ms,
        )
        .await?;
        Ok(res)
    }

    /// Build fresh snapshots for one feature across all providers.
    pub async fn build_snapshots(
        &self,
        feature: SyncFeature,
    ) -> std::collections::BTreeMap<String, crate::state::Index> {
        build_snapshots_for_feature(
            feature,
            &self.ctx.config,
            &self.ctx.providers,
            &self.ctx.snapshots,
            self.ctx.snapshot_ttl(),
            &self.ctx.emitter,
        )
        .await
    }

    /// Features enabled in any pair, narrowed by `only_feature`.
    fn enabled_features(&self) -> Vec<SyncFeature> {
        let mut features: BTreeSet<SyncFeature> = BTreeSet::new();
        for pair in self.ctx.config.enabled_pairs() {
            for (feature, toggle) in &pair.features {
                if toggle.is_enabled() {
                    features.insert(*feature);
                }
            }
        }
        if let Some(only) = self.ctx.only_feature {
            features.retain(|f| *f == only);
        }
        if features.is_empty() {
            features.insert(SyncFeature::Watchlist);
        }
        features.into_iter().collect()
    }

    /// Refresh provider snapshots for every non-watchlist feature and
    /// persist them as baselines, so external readers of the state file
    /// see current inventories even for pairs that planned no writes.
    async fn persist_feature_baselines(&self, features: &[SyncFeature]) {
        let mut state = self.ctx.store.load_state();
        let mut changed = false;
        for feature in features {
            if *feature == SyncFeature::Watchlist {
                continue;
            }
            self.ctx.snapshots.clear();
            let snaps = self.build_snapshots(*feature).await;
            for (provider, index) in snaps {
                state.set_baseline(&provider, *feature, &index);
                changed = true;
            }
        }
        if changed {
            state.last_sync_epoch = Some(now_epoch());
            self.ctx.store.save_state(&state);
            self.ctx.emitter.dbg(
                "state.persisted",
                json!({ "providers": state.providers.len(), "wall": state.wall.len() }),
            );
        }
    }

    /// Derive the deduplicated watchlist wall from all providers'
    /// baselines and persist it.
    fn persist_state_wall(&self) {
        let mut state = self.ctx.store.load_state();
        let mut seen: BTreeSet<String> = BTreeSet::new();
        let mut wall = Vec::new();
        for provider_features in state.providers.values() {
            let Some(record) = provider_features.get(&SyncFeature::Watchlist) else {
                continue;
            };
            for item in record.baseline.items.values() {
                let key = canonical_key(item);
                if seen.insert(key) {
                    wall.push(item.minimal());
                }
            }
        }
        state.wall = wall;
        state.last_sync_epoch = Some(now_epoch());
        self.ctx.store.save_state(&state);
        self.ctx.emitter.dbg(
            "state.persisted",
            json!({ "providers": state.providers.len(), "wall": state.wall.len() }),
        );
    }
}
