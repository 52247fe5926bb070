use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;

use serde_json::json;

use medley_config::SyncFeature;
use medley_model::{MediaItem, canonical_key};

use crate::events::Emitter;
use crate::state::blackbox::BlackboxStore;
use crate::state::now_epoch;
use crate::state::scope::safe_scope;
use crate::state::store::{read_json, write_atomic};

/// Short-term suppressor for add churn on one pair-feature.
///
/// Items whose add was confirmed very recently are not re-added when they
/// show up in the next plan; instead their minimal forms are parked in the
/// phantoms file and the keys are black-boxed as `phantom-replan`. This
/// absorbs providers that lag their own reads behind their writes.
#[derive(Debug)]
pub struct PhantomGuard {
    phantoms_path: PathBuf,
    last_success_path: PathBuf,
    ttl_days: Option<i64>,
    enabled: bool,
}

impl PhantomGuard {
    pub fn new(
        cache_dir: impl Into<PathBuf>,
        src: &str,
        dst: &str,
        feature: SyncFeature,
        ttl_days: Option<i64>,
        enabled: bool,
        scope: Option<&str>,
    ) -> PhantomGuard {
        let dir = cache_dir.into();
        let mut base = format!(
            "{feature}.{}-{}",
            src.to_ascii_lowercase(),
            dst.to_ascii_lowercase()
        );
        if let Some(scope) = scope {
            base.push('.');
            base.push_str(&safe_scope(scope));
        }
        PhantomGuard {
            phantoms_path: dir.join(format!("{base}.phantoms.json")),
            last_success_path: dir.join(format!("{base}.last_success.json")),
            ttl_days: ttl_days.filter(|d| *d > 0),
            enabled,
        }
    }

    /// Keys confirmed recently enough to still count, per the TTL.
    fn last_success_keys(&self) -> BTreeSet<String> {
        let map: BTreeMap<String, i64> =
            read_json(&self.last_success_path).unwrap_or_default();
        let cutoff = self.ttl_days.map(|d| now_epoch() - d * 86_400);
        map.into_iter()
            .filter(|(_, ts)| cutoff.is_none_or(|c| *ts >= c))
            .map(|(k, _)| k)
            .collect()
    }

    /// Canonical keys of the parked planned-but-blocked items.
    fn phantom_keys(&self) -> BTreeSet<String> {
        let items: Vec<MediaItem> = read_json(&self.phantoms_path).unwrap_or_default();
        items.iter().map(canonical_key).collect()
    }

    /// Filter a planned add list. Returns the surviving items and how many
    /// were blocked.
    pub fn filter_adds(
        &self,
        adds: Vec<MediaItem>,
        blackbox: &BlackboxStore,
        dst: &str,
        feature: SyncFeature,
        pair_key: &str,
        emitter: &Emitter,
    ) -> (Vec<MediaItem>, usize) {
        if !self.enabled || adds.is_empty() {
            return (adds, 0);
        }

        let last_ok = self.last_success_keys();
        let parked = self.phantom_keys();
        let planned: BTreeSet<String> = adds.iter().map(canonical_key).collect();

        let mut phantoms: BTreeSet<String> =
            planned.intersection(&last_ok).cloned().collect();
        phantoms.extend(parked);
        if phantoms.is_empty() {
            return (adds, 0);
        }

        let (blocked, keep): (Vec<MediaItem>, Vec<MediaItem>) = adds
            .into_iter()
            .partition(|it| phantoms.contains(&canonical_key(it)));

        let minimals: Vec<MediaItem> = blocked.iter().map(MediaItem::minimal).collect();
        write_atomic(&self.phantoms_path, &minimals);

        for key in blocked.iter().map(canonical_key).collect::<BTreeSet<_>>() {
            blackbox.insert(dst, feature, &key, "phantom-replan", Some(pair_key));
        }

        emitter.dbg(
            "blocked.counts",
            json!({
                "feature": feature,
                "dst": dst,
                "pair": pair_key,
                "blocked_blackbox": blocked.len(),
                "blocked_total": blocked.len(),
            }),
        );
        (keep, blocked.len())
    }

    /// Stamp confirmed keys into the last-success map.
    pub fn record_success<'a>(&self, keys: impl IntoIterator<Item = &'a String>) {
        if !self.enabled {
            return;
        }
        let mut map: BTreeMap<String, i64> =
            read_json(&self.last_success_path).unwrap_or_default();
        let now = now_epoch();
        for key in keys {
            map.insert(key.clone(), now);
        }
        write_atomic(&self.last_success_path, &map);
    }
}
