use std::path::Path;

use serde::{Deserialize, Serialize};

use medley_config::SyncFeature;
use medley_model::MediaItem;

use crate::state::now_epoch;
use crate::state::store::write_atomic;

/// Ledger of items diverted away from a destination because they carry
/// none of the id kinds that provider can resolve.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SkippedLedger {
    pub ts: i64,
    pub feature: String,
    pub dst: String,
    pub count: usize,
    pub items: Vec<MediaItem>,
}

/// Persist diverted items under `skipped_{provider}_{feature}.json`.
/// Overwrites the previous ledger; this is a last-write diagnostic, not a
/// log.
pub fn write_skipped(cache_dir: &Path, dst: &str, feature: SyncFeature, items: &[MediaItem]) {
    let ledger = SkippedLedger {
        ts: now_epoch(),
        feature: feature.to_string(),
        dst: dst.to_string(),
        count: items.len(),
        items: items.iter().map(MediaItem::minimal).collect(),
    };
    let path = cache_dir.join(format!(
        "skipped_{}_{}.json",
        dst.to_ascii_lowercase(),
        feature
    ));
    write_atomic(&path, &ledger);
}

#[cfg(test)]
mod tests {
    use super::*;
    use medley_model::IdKind;

    #[test]
    fn ledger_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let item = MediaItem {
            ids: [(IdKind::Plex, "42".to_string())].into(),
            ..Default::default()
        };
        write_skipped(dir.path(), "TRAKT", SyncFeature::Watchlist, &[item]);

        let path = dir.path().join("skipped_trakt_watchlist.json");
        let ledger: SkippedLedger =
            serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap();
        assert_eq!(ledger.count, 1);
        assert_eq!(ledger.dst, "TRAKT");
        assert!(ledger.ts > 0);
    }
}
