use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use medley_config::SyncFeature;
use medley_model::{MediaItem, canonical_key};

use crate::state::now_epoch;
use crate::state::store::{read_json, write_atomic};

/// Committed unresolved row for one canonical key.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct UnresolvedRecord {
    pub attempts: u32,
    pub item: Option<MediaItem>,
    pub reason: Option<String>,
    pub hint: Option<String>,
    pub ts: Option<i64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
struct PendingHint {
    reason: String,
    ts: i64,
}

/// Shape of the pending file the orchestrator appends to after writes.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
struct PendingDocument {
    keys: Vec<String>,
    items: BTreeMap<String, MediaItem>,
    hints: BTreeMap<String, PendingHint>,
}

/// Per-target unresolved bookkeeping.
///
/// Committed files (`{provider}_{feature}.unresolved.json`) are produced by
/// provider modules; the orchestrator only appends to the pending files.
/// Key reads union both, so unresolved state recorded during the current
/// write call is visible to the correction pass right after it.
#[derive(Debug, Clone)]
pub struct UnresolvedStore {
    dir: PathBuf,
}

impl UnresolvedStore {
    pub fn new(dir: impl Into<PathBuf>) -> UnresolvedStore {
        UnresolvedStore { dir: dir.into() }
    }

    fn committed_path(&self, dst: &str, feature: SyncFeature) -> PathBuf {
        self.dir
            .join(format!("{}_{}.unresolved.json", dst.to_ascii_lowercase(), feature))
    }

    fn pending_path(&self, dst: &str, feature: SyncFeature) -> PathBuf {
        self.dir.join(format!(
            "{}_{}.unresolved.pending.json",
            dst.to_ascii_lowercase(),
            feature
        ))
    }

    /// All unresolved canonical keys for a destination.
    ///
    /// With `cross_features` the union spans every feature's files for the
    /// destination, which is the blocklist default: an item a provider
    /// cannot resolve for one feature will not resolve for another either.
    pub fn load_keys(
        &self,
        dst: &str,
        feature: Option<SyncFeature>,
        cross_features: bool,
    ) -> BTreeSet<String> {
        let mut keys = BTreeSet::new();
        if dst.is_empty() {
            return keys;
        }

        if let (Some(feature), false) = (feature, cross_features) {
            self.collect_file(&self.committed_path(dst, feature), &mut keys);
            self.collect_file(&self.pending_path(dst, feature), &mut keys);
            return keys;
        }

        let prefix = format!("{}_", dst.to_ascii_lowercase());
        let Ok(entries) = std::fs::read_dir(&self.dir) else {
            return keys;
        };
        for entry in entries.flatten() {
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if !name.starts_with(&prefix) {
                continue;
            }
            if name.ends_with(".unresolved.json") || name.ends_with(".unresolved.pending.json") {
                self.collect_file(&entry.path(), &mut keys);
            }
        }
        keys
    }

    fn collect_file(&self, path: &std::path::Path, keys: &mut BTreeSet<String>) {
        let name = path.file_name().and_then(|n| n.to_str()).unwrap_or_default();
        if name.ends_with(".unresolved.pending.json") {
            if let Some(doc) = read_json::<PendingDocument>(path) {
                keys.extend(doc.keys);
            }
        } else if let Some(doc) = read_json::<BTreeMap<String, UnresolvedRecord>>(path) {
            keys.extend(doc.into_keys());
        }
    }

    /// Committed unresolved rows for a destination, keyed by canonical key.
    pub fn load_map(
        &self,
        dst: &str,
        feature: Option<SyncFeature>,
        cross_features: bool,
    ) -> BTreeMap<String, UnresolvedRecord> {
        let mut out = BTreeMap::new();
        if dst.is_empty() {
            return out;
        }

        if let (Some(feature), false) = (feature, cross_features) {
            if let Some(doc) =
                read_json::<BTreeMap<String, UnresolvedRecord>>(&self.committed_path(dst, feature))
            {
                out.extend(doc);
            }
            return out;
        }

        let prefix = format!("{}_", dst.to_ascii_lowercase());
        let Ok(entries) = std::fs::read_dir(&self.dir) else {
            return out;
        };
        for entry in entries.flatten() {
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if name.starts_with(&prefix)
                && name.ends_with(".unresolved.json")
                && let Some(doc) = read_json::<BTreeMap<String, UnresolvedRecord>>(&entry.path())
            {
                out.extend(doc);
            }
        }
        out
    }

    /// Append items to the pending file for a destination and feature.
    /// Returns how many keys were new.
    pub fn record_pending(
        &self,
        dst: &str,
        feature: SyncFeature,
        items: &[MediaItem],
        hint: &str,
    ) -> usize {
        let path = self.pending_path(dst, feature);
        let mut doc = read_json::<PendingDocument>(&path).unwrap_or_default();
        let now = now_epoch();

        let mut existing: BTreeSet<String> = doc.keys.iter().cloned().collect();
        let mut added = 0;
        for item in items {
            let min = item.minimal();
            let ck = canonical_key(&min);
            if ck == "unknown:" {
                continue;
            }
            if existing.insert(ck.clone()) {
                doc.keys.push(ck.clone());
                doc.items.insert(ck.clone(), min);
                added += 1;
            }
            if !hint.is_empty() {
                doc.hints
                    .insert(ck, PendingHint { reason: hint.to_string(), ts: now });
            }
        }

        write_atomic(&path, &doc);
        added
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use medley_model::IdKind;

    fn item(imdb: &str) -> MediaItem {
        MediaItem {
            ids: [(IdKind::Imdb, imdb.to_string())].into(),
            ..Default::default()
        }
    }

    #[test]
    fn pending_keys_become_visible() {
        let dir = tempfile::tempdir().unwrap();
        let store = UnresolvedStore::new(dir.path());

        let added =
            store.record_pending("PLEX", SyncFeature::Watchlist, &[item("tt01")], "add:failed");
        assert_eq!(added, 1);

        let keys = store.load_keys("PLEX", Some(SyncFeature::Watchlist), true);
        assert!(keys.contains("imdb:tt01"));
        // Scoped read sees it too.
        let keys = store.load_keys("PLEX", Some(SyncFeature::Watchlist), false);
        assert!(keys.contains("imdb:tt01"));
        // Other destinations see nothing.
        assert!(store.load_keys("TRAKT", None, true).is_empty());
    }

    #[test]
    fn recording_twice_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let store = UnresolvedStore::new(dir.path());
        store.record_pending("PLEX", SyncFeature::Watchlist, &[item("tt01")], "x");
        let added = store.record_pending("PLEX", SyncFeature::Watchlist, &[item("tt01")], "y");
        assert_eq!(added, 0);
        assert_eq!(
            store.load_keys("PLEX", Some(SyncFeature::Watchlist), false).len(),
            1
        );
    }

    #[test]
    fn cross_feature_union() {
        let dir = tempfile::tempdir().unwrap();
        let store = UnresolvedStore::new(dir.path());
        store.record_pending("PLEX", SyncFeature::Watchlist, &[item("tt01")], "");
        store.record_pending("PLEX", SyncFeature::Ratings, &[item("tt02")], "");

        let all = store.load_keys("PLEX", Some(SyncFeature::Watchlist), true);
        assert_eq!(all.len(), 2);
        let scoped = store.load_keys("PLEX", Some(SyncFeature::Watchlist), false);
        assert_eq!(scoped.len(), 1);
    }

    #[test]
    fn committed_rows_load_as_map() {
        let dir = tempfile::tempdir().unwrap();
        let store = UnresolvedStore::new(dir.path());
        let rows: BTreeMap<String, UnresolvedRecord> = [(
            "imdb:tt09".to_string(),
            UnresolvedRecord { attempts: 2, ts: Some(5), ..Default::default() },
        )]
        .into();
        write_atomic(
            &dir.path().join("plex_watchlist.unresolved.json"),
            &rows,
        );

        let map = store.load_map("PLEX", None, true);
        assert_eq!(map["imdb:tt09"].attempts, 2);
        let keys = store.load_keys("PLEX", None, true);
        assert!(keys.contains("imdb:tt09"));
    }
}
