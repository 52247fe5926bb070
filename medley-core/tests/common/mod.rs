#![allow(dead_code)]

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::Value;

use medley_config::{
    Config, FeatureOptions, FeatureToggle, PairConfig, SyncFeature, SyncMode,
};
use medley_contracts::{
    Activities, AdapterError, AdapterResult, ApplyOutcome, Capabilities, EventSink, MediaAdapter,
    ProviderHealth,
};
use medley_core::events::ProgressFn;
use medley_model::{IdKind, MediaItem, MediaKind, canonical_key};

/// In-memory adapter with a mutable inventory and scriptable failure
/// modes, standing in for a real service.
pub struct FakeAdapter {
    name: String,
    pub index: Mutex<BTreeMap<String, MediaItem>>,
    capabilities: Mutex<Capabilities>,
    health: Mutex<ProviderHealth>,
    activities: Mutex<Activities>,
    pub add_calls: Mutex<Vec<Vec<MediaItem>>>,
    /// Feature of each `add` call, parallel to `add_calls`.
    pub add_features: Mutex<Vec<SyncFeature>>,
    pub remove_calls: Mutex<Vec<Vec<MediaItem>>>,
    /// Items the next `add` call reports as unresolved.
    pub unresolved_on_next_add: Mutex<Vec<MediaItem>>,
    /// When set, `build_index` fails with a provider error.
    pub fail_build_index: Mutex<bool>,
    pub build_calls: Mutex<u32>,
}

impl FakeAdapter {
    pub fn new(name: &str, items: &[MediaItem]) -> Arc<FakeAdapter> {
        let index = items
            .iter()
            .map(|it| (canonical_key(it), it.clone()))
            .collect();
        Arc::new(FakeAdapter {
            name: name.to_string(),
            index: Mutex::new(index),
            capabilities: Mutex::new(Capabilities::default()),
            health: Mutex::new(ProviderHealth::default()),
            activities: Mutex::new(Activities::default()),
            add_calls: Mutex::new(Vec::new()),
            add_features: Mutex::new(Vec::new()),
            remove_calls: Mutex::new(Vec::new()),
            unresolved_on_next_add: Mutex::new(Vec::new()),
            fail_build_index: Mutex::new(false),
            build_calls: Mutex::new(0),
        })
    }

    pub fn set_capabilities(&self, caps: Capabilities) {
        *self.capabilities.lock().unwrap() = caps;
    }

    pub fn set_health(&self, health: ProviderHealth) {
        *self.health.lock().unwrap() = health;
    }

    pub fn set_watchlist_checkpoint(&self, checkpoint: &str) {
        self.activities.lock().unwrap().watchlist = Some(checkpoint.to_string());
    }

    pub fn keys(&self) -> Vec<String> {
        self.index.lock().unwrap().keys().cloned().collect()
    }

    pub fn remove_item(&self, key: &str) {
        self.index.lock().unwrap().remove(key);
    }

    pub fn imdb_of(items: &[MediaItem]) -> Vec<String> {
        items
            .iter()
            .filter_map(|it| it.ids.get(&IdKind::Imdb).cloned())
            .collect()
    }
}

#[async_trait]
impl MediaAdapter for FakeAdapter {
    fn name(&self) -> &str {
        &self.name
    }

    fn features(&self) -> BTreeMap<SyncFeature, bool> {
        [
            (SyncFeature::Watchlist, true),
            (SyncFeature::Ratings, true),
            (SyncFeature::History, true),
            (SyncFeature::Playlists, true),
        ]
        .into()
    }

    fn capabilities(&self) -> Capabilities {
        self.capabilities.lock().unwrap().clone()
    }

    fn is_configured(&self, _cfg: &Config) -> bool {
        true
    }

    async fn health(
        &self,
        _cfg: &Config,
        _emit: Option<&dyn EventSink>,
    ) -> AdapterResult<ProviderHealth> {
        Ok(self.health.lock().unwrap().clone())
    }

    async fn activities(&self, _cfg: &Config) -> AdapterResult<Activities> {
        Ok(self.activities.lock().unwrap().clone())
    }

    async fn build_index(
        &self,
        _cfg: &Config,
        _feature: SyncFeature,
    ) -> AdapterResult<Vec<MediaItem>> {
        *self.build_calls.lock().unwrap() += 1;
        if *self.fail_build_index.lock().unwrap() {
            return Err(AdapterError::Provider("index unavailable".into()));
        }
        Ok(self.index.lock().unwrap().values().cloned().collect())
    }

    async fn add(
        &self,
        _cfg: &Config,
        items: &[MediaItem],
        feature: SyncFeature,
        dry_run: bool,
    ) -> AdapterResult<ApplyOutcome> {
        self.add_calls.lock().unwrap().push(items.to_vec());
        self.add_features.lock().unwrap().push(feature);
        let unresolved: Vec<MediaItem> =
            std::mem::take(&mut *self.unresolved_on_next_add.lock().unwrap());
        let unresolved_keys: Vec<String> = unresolved.iter().map(canonical_key).collect();
        if !dry_run {
            let mut index = self.index.lock().unwrap();
            for item in items {
                let key = canonical_key(item);
                if !unresolved_keys.contains(&key) {
                    index.insert(key, item.minimal());
                }
            }
        }
        Ok(ApplyOutcome { ok: true, count: items.len(), unresolved })
    }

    async fn remove(
        &self,
        _cfg: &Config,
        items: &[MediaItem],
        _feature: SyncFeature,
        dry_run: bool,
    ) -> AdapterResult<ApplyOutcome> {
        self.remove_calls.lock().unwrap().push(items.to_vec());
        if !dry_run {
            let mut index = self.index.lock().unwrap();
            for item in items {
                index.remove(&canonical_key(item));
            }
        }
        Ok(ApplyOutcome::done(items.len()))
    }
}

pub fn movie(imdb: &str, title: &str, year: i32) -> MediaItem {
    MediaItem {
        kind: MediaKind::Movie,
        title: Some(title.to_string()),
        year: Some(year),
        ids: [(IdKind::Imdb, imdb.to_string())].into(),
        ..Default::default()
    }
}

/// A watchlist pair config with adds and removals enabled.
pub fn watchlist_pair(src: &str, dst: &str, mode: SyncMode) -> PairConfig {
    PairConfig {
        id: Some(format!("{src}-{dst}")),
        enabled: true,
        source: src.to_string(),
        target: dst.to_string(),
        mode,
        feature: Some("watchlist".into()),
        features: [(
            SyncFeature::Watchlist,
            FeatureToggle::Options(FeatureOptions {
                enable: true,
                add: Some(true),
                remove: Some(true),
                ..Default::default()
            }),
        )]
        .into(),
    }
}

/// A ratings pair config with optional type/date filters.
pub fn ratings_pair(
    src: &str,
    dst: &str,
    mode: SyncMode,
    types: Vec<String>,
    from_date: Option<String>,
) -> PairConfig {
    PairConfig {
        id: Some(format!("{src}-{dst}")),
        enabled: true,
        source: src.to_string(),
        target: dst.to_string(),
        mode,
        feature: Some("ratings".into()),
        features: [(
            SyncFeature::Ratings,
            FeatureToggle::Options(FeatureOptions {
                enable: true,
                add: Some(true),
                remove: Some(true),
                types,
                from_date,
            }),
        )]
        .into(),
    }
}

pub fn rated_movie(imdb: &str, title: &str, year: i32, rating: f64) -> MediaItem {
    MediaItem {
        rating: Some(rating),
        ..movie(imdb, title, year)
    }
}

/// Baseline config for the scenario tests: one pair, removals allowed,
/// mass-delete guard off so small fixtures can exercise removals.
pub fn base_config(src: &str, dst: &str, mode: SyncMode) -> Config {
    let mut cfg = Config::default();
    cfg.pairs = vec![watchlist_pair(src, dst, mode)];
    cfg.sync.enable_remove = true;
    cfg.sync.allow_mass_delete = true;
    cfg.runtime.debug = true;
    cfg
}

/// Route engine tracing into the test harness when `RUST_LOG` asks for it.
pub fn init_tracing() {
    use tracing_subscriber::EnvFilter;
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Progress sink capturing emitted lines for event assertions.
pub fn capture_events() -> (ProgressFn, Arc<Mutex<Vec<String>>>) {
    let lines: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&lines);
    let progress: ProgressFn = Arc::new(move |line: &str| {
        sink.lock().unwrap().push(line.to_string());
    });
    (progress, lines)
}

/// Every emitted event with the given name, parsed.
pub fn events_named(lines: &Arc<Mutex<Vec<String>>>, name: &str) -> Vec<Value> {
    lines
        .lock()
        .unwrap()
        .iter()
        .filter_map(|l| serde_json::from_str::<Value>(l).ok())
        .filter(|v| v.get("event").and_then(Value::as_str) == Some(name))
        .collect()
}
