use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use medley_config::{BlackboxSettings, SyncFeature};

use crate::state::now_epoch;
use crate::state::store::{read_json, write_atomic};
use crate::state::unresolved::UnresolvedRecord;

/// A promoted persistently-failing key.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BlackboxEntry {
    pub reason: String,
    pub since: i64,
}

/// Consecutive-failure counter row.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FlapRow {
    pub consecutive: u32,
    pub last_reason: String,
    pub last_op: String,
    pub last_attempt_ts: Option<i64>,
    pub last_success_ts: Option<i64>,
}

/// Outcome of one `record_attempts` call.
#[derive(Debug, Clone, Copy, Default)]
pub struct AttemptSummary {
    pub count: usize,
    pub promoted: usize,
}

/// Blackbox of keys that keep failing against a destination.
///
/// Keys flap-count per `(destination, feature)`; once a key fails
/// `promote_after` times in a row, or its unresolved entry has aged past
/// `unresolved_days`, it is promoted and blocks further futile writes
/// until the cooldown prunes it.
#[derive(Debug, Clone)]
pub struct BlackboxStore {
    dir: PathBuf,
    settings: BlackboxSettings,
}

impl BlackboxStore {
    pub fn new(dir: impl Into<PathBuf>, settings: BlackboxSettings) -> BlackboxStore {
        BlackboxStore { dir: dir.into(), settings }
    }

    pub fn settings(&self) -> &BlackboxSettings {
        &self.settings
    }

    fn bb_path(&self, dst: &str, feature: SyncFeature, pair: Option<&str>) -> PathBuf {
        let dst = dst.to_ascii_lowercase();
        match pair {
            Some(pair) => self
                .dir
                .join(format!("{dst}_{feature}.{}.blackbox.json", pair.to_ascii_lowercase())),
            None => self.dir.join(format!("{dst}_{feature}.blackbox.json")),
        }
    }

    fn flap_path(&self, dst: &str, feature: SyncFeature) -> PathBuf {
        self.dir
            .join(format!("{}_{feature}.flap.json", dst.to_ascii_lowercase()))
    }

    fn scoped_pair<'a>(&self, pair: Option<&'a str>) -> Option<&'a str> {
        if self.settings.pair_scoped { pair } else { None }
    }

    /// Promoted keys for a destination: the global file plus, when given,
    /// the pair-scoped one.
    pub fn load_keys(&self, dst: &str, feature: SyncFeature, pair: Option<&str>) -> BTreeSet<String> {
        let mut keys: BTreeSet<String> =
            read_json::<BTreeMap<String, BlackboxEntry>>(&self.bb_path(dst, feature, None))
                .map(|m| m.into_keys().collect())
                .unwrap_or_default();
        if let Some(pair) = self.scoped_pair(pair) {
            if let Some(m) =
                read_json::<BTreeMap<String, BlackboxEntry>>(&self.bb_path(dst, feature, Some(pair)))
            {
                keys.extend(m.into_keys());
            }
        }
        keys
    }

    pub fn load_flap_counters(&self, dst: &str, feature: SyncFeature) -> BTreeMap<String, FlapRow> {
        read_json(&self.flap_path(dst, feature)).unwrap_or_default()
    }

    /// Directly promote a key, e.g. when the phantom guard re-blocks a
    /// freshly re-planned add.
    pub fn insert(
        &self,
        dst: &str,
        feature: SyncFeature,
        key: &str,
        reason: &str,
        pair: Option<&str>,
    ) {
        self.promote(dst, feature, key, reason, now_epoch(), self.scoped_pair(pair));
    }

    fn promote(
        &self,
        dst: &str,
        feature: SyncFeature,
        key: &str,
        reason: &str,
        ts: i64,
        pair: Option<&str>,
    ) -> bool {
        let path = self.bb_path(dst, feature, pair);
        let mut doc = read_json::<BTreeMap<String, BlackboxEntry>>(&path).unwrap_or_default();
        if doc.contains_key(key) {
            return false;
        }
        doc.insert(key.to_string(), BlackboxEntry { reason: reason.to_string(), since: ts });
        write_atomic(&path, &doc);
        true
    }

    /// Register failed attempts: bump the flap counters and promote any
    /// key that crossed a promotion rule.
    pub fn record_attempts<'a>(
        &self,
        dst: &str,
        feature: SyncFeature,
        keys: impl IntoIterator<Item = &'a String>,
        reason: &str,
        op: &str,
        pair: Option<&str>,
        unresolved_map: Option<&BTreeMap<String, UnresolvedRecord>>,
    ) -> AttemptSummary {
        let ts = now_epoch();
        let pair = self.scoped_pair(pair);
        let flap_path = self.flap_path(dst, feature);
        let mut counters = self.load_flap_counters(dst, feature);

        let mut summary = AttemptSummary::default();
        for key in keys {
            summary.count += 1;
            let row = counters.entry(key.clone()).or_default();
            row.consecutive += 1;
            row.last_reason = reason.to_string();
            row.last_op = op.to_string();
            row.last_attempt_ts = Some(ts);

            if self.should_promote(row.consecutive, key, ts, unresolved_map)
                && self.promote(dst, feature, key, &self.promotion_reason(row.consecutive), ts, pair)
            {
                summary.promoted += 1;
            }
        }

        write_atomic(&flap_path, &counters);
        summary
    }

    fn should_promote(
        &self,
        consecutive: u32,
        key: &str,
        ts: i64,
        unresolved_map: Option<&BTreeMap<String, UnresolvedRecord>>,
    ) -> bool {
        let promote_after = self.settings.promote_after.max(1);
        if consecutive >= promote_after {
            return true;
        }
        if self.settings.unresolved_days > 0
            && let Some(map) = unresolved_map
            && let Some(meta) = map.get(key)
            && let Some(uts) = meta.ts
            && uts > 0
        {
            let age_days = (ts - uts) as f64 / 86_400.0;
            return age_days >= self.settings.unresolved_days as f64;
        }
        false
    }

    fn promotion_reason(&self, consecutive: u32) -> String {
        let promote_after = self.settings.promote_after.max(1);
        if consecutive >= promote_after {
            format!("flapper:consecutive>={promote_after}")
        } else {
            format!("unresolved_age>={}d", self.settings.unresolved_days)
        }
    }

    /// Reset flap counters after confirmed successes.
    pub fn record_success<'a>(
        &self,
        dst: &str,
        feature: SyncFeature,
        keys: impl IntoIterator<Item = &'a String>,
    ) {
        let ts = now_epoch();
        let path = self.flap_path(dst, feature);
        let mut counters = self.load_flap_counters(dst, feature);
        for key in keys {
            let row = counters.entry(key.clone()).or_default();
            row.consecutive = 0;
            row.last_reason = "ok".to_string();
            row.last_success_ts = Some(ts);
        }
        write_atomic(&path, &counters);
    }

    /// Drop entries older than the cooldown across every blackbox file.
    /// Returns `(files scanned, entries removed)`.
    pub fn prune(&self) -> (usize, usize) {
        let cooldown_secs = self.settings.cooldown_days.max(0) * 86_400;
        let now = now_epoch();
        let mut scanned = 0;
        let mut removed = 0;

        let Ok(entries) = std::fs::read_dir(&self.dir) else {
            return (0, 0);
        };
        for entry in entries.flatten() {
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if !name.ends_with(".blackbox.json") {
                continue;
            }
            scanned += 1;
            let path = entry.path();
            let Some(mut doc) = read_json::<BTreeMap<String, BlackboxEntry>>(&path) else {
                continue;
            };
            let before = doc.len();
            doc.retain(|_, e| e.since == 0 || now - e.since <= cooldown_secs);
            if doc.len() != before {
                removed += before - doc.len();
                write_atomic(&path, &doc);
            }
        }
        (scanned, removed)
    }
}
