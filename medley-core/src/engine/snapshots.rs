use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use serde_json::json;

use medley_config::{Config, SyncFeature};
use medley_contracts::{IndexSemantics, MediaAdapter};
use medley_model::{canonical_key, parse_epoch};

use crate::events::Emitter;
use crate::registry::ProviderRegistry;
use crate::state::{Index, StateDocument};

/// TTL-memoized snapshot cache keyed by `(provider, feature)`.
///
/// Concurrent misses may both call `build_index`; last writer wins, which
/// is fine for a cache of identical data.
#[derive(Debug, Default)]
pub struct SnapshotCache {
    entries: Mutex<HashMap<(String, SyncFeature), (Instant, Index)>>,
}

impl SnapshotCache {
    pub fn get(&self, provider: &str, feature: SyncFeature, ttl: Duration) -> Option<Index> {
        if ttl.is_zero() {
            return None;
        }
        let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        let (at, index) = entries.get(&(provider.to_string(), feature))?;
        if at.elapsed() < ttl { Some(index.clone()) } else { None }
    }

    pub fn put(&self, provider: &str, feature: SyncFeature, index: Index) {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.insert((provider.to_string(), feature), (Instant::now(), index));
    }

    pub fn clear(&self) {
        self.entries.lock().unwrap_or_else(|e| e.into_inner()).clear();
    }
}

/// Providers referenced by enabled pairs whose feature map enables the
/// feature. An empty result means "no restriction".
pub fn allowed_providers_for_feature(config: &Config, feature: SyncFeature) -> BTreeSet<String> {
    let mut allowed = BTreeSet::new();
    for pair in config.enabled_pairs() {
        let enabled = pair
            .toggle_for(feature)
            .map(|t| t.is_enabled())
            .unwrap_or(false);
        if !enabled {
            continue;
        }
        let src = pair.source_upper();
        let dst = pair.target_upper();
        if !src.is_empty() {
            allowed.insert(src);
        }
        if !dst.is_empty() {
            allowed.insert(dst);
        }
    }
    allowed
}

/// Build canonical-keyed snapshots for every provider relevant to the
/// feature.
///
/// A provider that throws gets an empty index and is marked degraded for
/// the cycle; degraded or empty results are never cached, so the next
/// cycle retries.
pub async fn build_snapshots_for_feature(
    feature: SyncFeature,
    config: &Config,
    providers: &ProviderRegistry,
    cache: &SnapshotCache,
    snap_ttl: Duration,
    emitter: &Emitter,
) -> BTreeMap<String, Index> {
    let mut snaps = BTreeMap::new();
    let allowed = allowed_providers_for_feature(config, feature);

    for (name, adapter) in providers.iter() {
        if !adapter.features().get(&feature).copied().unwrap_or(false) {
            continue;
        }
        if !allowed.is_empty() && !allowed.contains(name) {
            continue;
        }
        if !adapter.is_configured(config) {
            continue;
        }

        if let Some(index) = cache.get(name, feature, snap_ttl) {
            emitter.dbg(
                "snapshot.memo",
                json!({ "provider": name, "feature": feature, "count": index.len() }),
            );
            snaps.insert(name.to_string(), index);
            continue;
        }

        let mut degraded = false;
        let items = match adapter.build_index(config, feature).await {
            Ok(items) => items,
            Err(err) => {
                emitter.info(&format!(
                    "[!] snapshot.failed provider={name} feature={feature} error={err}"
                ));
                emitter.dbg(
                    "provider.degraded",
                    json!({ "provider": name, "feature": feature }),
                );
                degraded = true;
                Vec::new()
            }
        };

        let index: Index = items
            .into_iter()
            .map(|item| (canonical_key(&item), item))
            .collect();

        if !snap_ttl.is_zero() {
            if degraded || index.is_empty() {
                emitter.dbg(
                    "snapshot.no_cache_empty",
                    json!({ "provider": name, "feature": feature, "degraded": degraded }),
                );
            } else {
                cache.put(name, feature, index.clone());
            }
        }
        emitter.dbg(
            "snapshot",
            json!({ "provider": name, "feature": feature, "count": index.len() }),
        );
        snaps.insert(name.to_string(), index);
    }
    snaps
}

/// The provider's current checkpoint hint for a feature.
pub async fn module_checkpoint(
    adapter: &dyn MediaAdapter,
    config: &Config,
    feature: SyncFeature,
) -> Option<String> {
    match adapter.activities(config).await {
        Ok(acts) => acts.checkpoint_for(feature),
        Err(_) => None,
    }
}

/// The checkpoint persisted with the previous baseline.
pub fn prev_checkpoint(state: &StateDocument, provider: &str, feature: SyncFeature) -> Option<String> {
    state.checkpoint(provider, feature)
}

/// Outcome of the suspect-shrink guard.
#[derive(Debug, Clone)]
pub struct SuspectVerdict {
    pub index: Index,
    pub suspect: bool,
    pub reason: &'static str,
}

/// Decide whether a shrunken snapshot can be trusted.
///
/// A present-semantics snapshot that collapsed below the shrink ratio of a
/// non-trivial baseline, while the provider's checkpoint failed to advance,
/// is replaced by the previous baseline for planning. Delta providers are
/// exempt: their snapshots are supposed to be small.
#[allow(clippy::too_many_arguments)]
pub fn coerce_suspect_snapshot(
    provider: &str,
    semantics: IndexSemantics,
    prev_idx: &Index,
    cur_idx: &Index,
    feature: SyncFeature,
    suspect_min_prev: usize,
    suspect_shrink_ratio: f64,
    suspect_debug: bool,
    emitter: &Emitter,
    prev_cp: Option<&str>,
    now_cp: Option<&str>,
) -> SuspectVerdict {
    if semantics == IndexSemantics::Delta {
        return SuspectVerdict { index: cur_idx.clone(), suspect: false, reason: "semantics:delta" };
    }

    let prev_count = prev_idx.len();
    let cur_count = cur_idx.len();
    if prev_count < suspect_min_prev {
        return SuspectVerdict { index: cur_idx.clone(), suspect: false, reason: "baseline:tiny" };
    }

    let shrink_limit = ((prev_count as f64 * suspect_shrink_ratio) as usize).max(1);
    let shrunk = cur_count == 0 || cur_count <= shrink_limit;
    if !shrunk {
        return SuspectVerdict { index: cur_idx.clone(), suspect: false, reason: "ok" };
    }

    let prev_ts = prev_cp.and_then(parse_epoch);
    let now_ts = now_cp.and_then(parse_epoch);
    let no_progress = match (prev_ts, now_ts) {
        (Some(p), Some(n)) => n <= p,
        (Some(_), None) => true,
        _ => matches!((prev_cp, now_cp), (Some(p), Some(n)) if p == n),
    };

    if no_progress {
        let reason = "suspect:no-progress+shrunk";
        if suspect_debug {
            emitter.emit(
                "snapshot:suspect",
                json!({
                    "provider": provider,
                    "feature": feature,
                    "prev_count": prev_count,
                    "cur_count": cur_count,
                    "shrink_limit": shrink_limit,
                    "prev_checkpoint": prev_cp,
                    "now_checkpoint": now_cp,
                    "reason": reason,
                }),
            );
        }
        return SuspectVerdict { index: prev_idx.clone(), suspect: true, reason };
    }
    SuspectVerdict { index: cur_idx.clone(), suspect: false, reason: "progressed" }
}
