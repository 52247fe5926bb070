use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use medley_config::SyncFeature;
use medley_model::MediaItem;

/// Canonical-keyed item index.
pub type Index = BTreeMap<String, MediaItem>;

/// Last reconciled snapshot of one (provider, feature).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Baseline {
    pub items: Index,
}

/// Per-provider per-feature record: baseline plus the provider-supplied
/// monotonic progress hint.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FeatureRecord {
    pub baseline: Baseline,
    pub checkpoint: Option<String>,
}

/// Aggregate run counters.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RunTotals {
    pub added: usize,
    pub removed: usize,
    pub unresolved: usize,
}

/// `last_sync.json` payload.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LastSyncDocument {
    pub started_at: i64,
    pub finished_at: i64,
    pub result: RunTotals,
}

/// `state.json` payload.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StateDocument {
    pub providers: BTreeMap<String, BTreeMap<SyncFeature, FeatureRecord>>,
    /// Deduplicated watchlist overview derived from all baselines.
    pub wall: Vec<MediaItem>,
    pub last_sync_epoch: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metrics: Option<MetricsRecord>,
}

/// Persisted telemetry roll-ups.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsRecord {
    pub api: ApiMetricsRecord,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiMetricsRecord {
    /// Stamped totals payload from the most recent run.
    pub last: Option<Value>,
}

/// `tombstones.json` payload.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TombstoneDocument {
    /// Token → epoch seconds at which the deletion was recorded.
    pub keys: BTreeMap<String, i64>,
    pub pruned_at: Option<i64>,
    pub ttl_sec: Option<i64>,
}

impl StateDocument {
    /// Baseline items of one (provider, feature), cloned out.
    pub fn baseline_items(&self, provider: &str, feature: SyncFeature) -> Index {
        self.providers
            .get(provider)
            .and_then(|m| m.get(&feature))
            .map(|r| r.baseline.items.clone())
            .unwrap_or_default()
    }

    pub fn checkpoint(&self, provider: &str, feature: SyncFeature) -> Option<String> {
        self.providers
            .get(provider)
            .and_then(|m| m.get(&feature))
            .and_then(|r| r.checkpoint.clone())
    }

    fn record_mut(&mut self, provider: &str, feature: SyncFeature) -> &mut FeatureRecord {
        self.providers
            .entry(provider.to_string())
            .or_default()
            .entry(feature)
            .or_default()
    }

    /// Replace the baseline with the minimal forms of `items`.
    pub fn set_baseline(&mut self, provider: &str, feature: SyncFeature, items: &Index) {
        let record = self.record_mut(provider, feature);
        record.baseline.items =
            items.iter().map(|(k, v)| (k.clone(), v.minimal())).collect();
    }

    /// Store a checkpoint; `None` leaves the previous one in place.
    pub fn set_checkpoint(&mut self, provider: &str, feature: SyncFeature, cp: Option<String>) {
        if let Some(cp) = cp {
            self.record_mut(provider, feature).checkpoint = Some(cp);
        }
    }
}

/// Atomic JSON persistence rooted at one state directory.
///
/// Reads tolerate missing or corrupt files by falling back to typed
/// defaults; writes go through a `*.tmp` rename so readers never observe a
/// half-written file. Persistence failures are logged and swallowed: the
/// in-memory result of a cycle is still returned and the next cycle simply
/// sees the previous baseline.
#[derive(Debug, Clone)]
pub struct StateStore {
    base: PathBuf,
}

impl StateStore {
    pub fn new(base: impl Into<PathBuf>) -> StateStore {
        StateStore { base: base.into() }
    }

    pub fn base(&self) -> &Path {
        &self.base
    }

    /// Directory holding per-provider and per-pair cache files.
    pub fn cache_dir(&self) -> PathBuf {
        self.base.join(".cw_state")
    }

    pub fn state_path(&self) -> PathBuf {
        self.base.join("state.json")
    }

    pub fn tombstones_path(&self) -> PathBuf {
        self.base.join("tombstones.json")
    }

    pub fn last_sync_path(&self) -> PathBuf {
        self.base.join("last_sync.json")
    }

    pub fn watchlist_hide_path(&self) -> PathBuf {
        self.base.join("watchlist_hide.json")
    }

    pub fn ratings_changes_path(&self) -> PathBuf {
        self.base.join("ratings_changes.json")
    }

    pub fn load_state(&self) -> StateDocument {
        read_json(&self.state_path()).unwrap_or_default()
    }

    pub fn save_state(&self, doc: &StateDocument) {
        write_atomic(&self.state_path(), doc);
    }

    pub fn load_tombstones(&self) -> TombstoneDocument {
        read_json(&self.tombstones_path()).unwrap_or_default()
    }

    pub fn save_tombstones(&self, doc: &TombstoneDocument) {
        write_atomic(&self.tombstones_path(), doc);
    }

    pub fn save_last_sync(&self, doc: &LastSyncDocument) {
        write_atomic(&self.last_sync_path(), doc);
    }

    pub fn save_ratings_changes(&self, data: &Value) {
        write_atomic(&self.ratings_changes_path(), data);
    }

    /// Drop the UI hide list; falls back to truncating it to an empty list
    /// when the file cannot be removed.
    pub fn clear_watchlist_hide(&self) {
        let path = self.watchlist_hide_path();
        if !path.exists() {
            return;
        }
        if let Err(err) = std::fs::remove_file(&path) {
            tracing::warn!(path = %path.display(), %err, "failed to remove hide file");
            write_atomic::<Vec<Value>>(&path, &Vec::new());
        }
    }
}

/// Read a JSON file into a typed document. Missing files and parse
/// failures both yield `None`; the caller supplies the default.
pub fn read_json<T: DeserializeOwned>(path: &Path) -> Option<T> {
    let raw = match std::fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return None,
        Err(err) => {
            tracing::warn!(path = %path.display(), %err, "failed to read state file");
            return None;
        }
    };
    match serde_json::from_str(&raw) {
        Ok(doc) => Some(doc),
        Err(err) => {
            tracing::warn!(path = %path.display(), %err, "failed to parse state file");
            None
        }
    }
}

/// Write a document as pretty JSON with sorted keys via `*.tmp` + rename.
pub fn write_atomic<T: Serialize>(path: &Path, doc: &T) {
    let result = (|| -> std::io::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        // Round-trip through Value so object keys come out sorted.
        let value = serde_json::to_value(doc).map_err(std::io::Error::other)?;
        let text = serde_json::to_string_pretty(&value).map_err(std::io::Error::other)?;
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, text)?;
        std::fs::rename(&tmp, path)
    })();
    if let Err(err) = result {
        tracing::warn!(path = %path.display(), %err, "failed to persist state file");
    }
}
