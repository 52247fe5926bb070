use std::collections::BTreeSet;

use serde_json::json;

use medley_config::SyncFeature;
use medley_model::MediaItem;

use crate::events::Emitter;
use crate::state::blackbox::BlackboxStore;
use crate::state::store::StateStore;
use crate::state::tombstones::{item_is_blocked, keys_for_feature};
use crate::state::unresolved::UnresolvedStore;

/// The four blocked-key sources for one destination, kept apart for
/// diagnostics.
#[derive(Debug, Default)]
pub struct BlocklistBreakdown {
    pub global_tomb: BTreeSet<String>,
    pub pair_tomb: BTreeSet<String>,
    pub unresolved: BTreeSet<String>,
    pub blackbox: BTreeSet<String>,
}

impl BlocklistBreakdown {
    pub fn union(&self) -> BTreeSet<String> {
        let mut out = self.global_tomb.clone();
        out.extend(self.pair_tomb.iter().cloned());
        out.extend(self.unresolved.iter().cloned());
        out.extend(self.blackbox.iter().cloned());
        out
    }
}

fn breakdown(
    store: &StateStore,
    unresolved: &UnresolvedStore,
    blackbox: &BlackboxStore,
    dst: &str,
    feature: SyncFeature,
    pair_key: Option<&str>,
    cross_feature_unresolved: bool,
) -> BlocklistBreakdown {
    BlocklistBreakdown {
        global_tomb: keys_for_feature(store, feature.as_str(), None, true)
            .into_keys()
            .collect(),
        pair_tomb: pair_key
            .map(|p| {
                keys_for_feature(store, feature.as_str(), Some(p), false)
                    .into_keys()
                    .collect()
            })
            .unwrap_or_default(),
        unresolved: unresolved.load_keys(dst, Some(feature), cross_feature_unresolved),
        blackbox: blackbox.load_keys(dst, feature, pair_key),
    }
}

/// All keys blocked for writes to one destination.
pub fn blocked_keys_for_destination(
    store: &StateStore,
    unresolved: &UnresolvedStore,
    blackbox: &BlackboxStore,
    dst: &str,
    feature: SyncFeature,
    pair_key: Option<&str>,
) -> BTreeSet<String> {
    breakdown(store, unresolved, blackbox, dst, feature, pair_key, true).union()
}

/// Filter planned items through the union blocklist: tombstones (global and
/// pair-scoped), unresolved, and blackbox. Matching is alias-aware, so an
/// item is dropped when *any* of its keys hit the set.
pub fn apply_blocklist(
    store: &StateStore,
    unresolved: &UnresolvedStore,
    blackbox: &BlackboxStore,
    items: Vec<MediaItem>,
    dst: &str,
    feature: SyncFeature,
    pair_key: Option<&str>,
    emitter: &Emitter,
) -> Vec<MediaItem> {
    let parts = breakdown(store, unresolved, blackbox, dst, feature, pair_key, true);
    let blocked = parts.union();

    emitter.dbg(
        "blocked.counts",
        json!({
            "feature": feature,
            "dst": dst,
            "pair": pair_key,
            "blocked_global_tomb": parts.global_tomb.len(),
            "blocked_pair_tomb": parts.pair_tomb.len(),
            "blocked_unresolved": parts.unresolved.len(),
            "blocked_blackbox": parts.blackbox.len(),
            "blocked_total": blocked.len(),
        }),
    );

    if blocked.is_empty() {
        return items;
    }
    items
        .into_iter()
        .filter(|it| !item_is_blocked(it, &blocked))
        .collect()
}
