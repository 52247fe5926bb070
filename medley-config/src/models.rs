use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::feature::{DEFAULT_FEATURES, SyncFeature};

/// Root configuration of a synchronization deployment.
///
/// Every section is optional in the serialized form; missing pieces
/// collapse to typed defaults so a minimal config stays minimal.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Opaque per-provider sections, keyed by upper-case provider name.
    /// Adapters own their shape; the orchestrator only passes them through.
    pub providers: BTreeMap<String, Value>,
    pub pairs: Vec<PairConfig>,
    pub sync: SyncSettings,
    pub runtime: RuntimeSettings,
    pub telemetry: TelemetrySettings,
}

impl Config {
    /// Enabled pairs only, in configured order.
    pub fn enabled_pairs(&self) -> impl Iterator<Item = &PairConfig> {
        self.pairs.iter().filter(|p| p.enabled)
    }

    /// The opaque settings block for one provider, if present.
    pub fn provider_section(&self, name: &str) -> Option<&Value> {
        self.providers.get(&name.to_ascii_uppercase())
    }
}

/// Sync-level behavior flags shared by every pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncSettings {
    pub dry_run: bool,
    pub enable_add: bool,
    pub enable_remove: bool,
    pub include_observed_deletes: bool,
    pub allow_mass_delete: bool,
    pub verify_after_write: bool,
    pub tombstone_ttl_days: i64,
    /// Enables the suspect-shrink snapshot guard.
    pub drop_guard: bool,
    pub blackbox: BlackboxSettings,
}

impl Default for SyncSettings {
    fn default() -> Self {
        SyncSettings {
            dry_run: false,
            enable_add: true,
            enable_remove: false,
            include_observed_deletes: true,
            allow_mass_delete: true,
            verify_after_write: false,
            tombstone_ttl_days: 30,
            drop_guard: false,
            blackbox: BlackboxSettings::default(),
        }
    }
}

/// Settings for the persistent-failure blackbox.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BlackboxSettings {
    pub enabled: bool,
    /// Consecutive failures before a key is promoted.
    pub promote_after: u32,
    /// Promote when an unresolved entry is at least this old; 0 disables.
    pub unresolved_days: i64,
    pub pair_scoped: bool,
    pub cooldown_days: i64,
    pub block_adds: bool,
    pub block_removes: bool,
}

impl Default for BlackboxSettings {
    fn default() -> Self {
        BlackboxSettings {
            enabled: true,
            promote_after: 3,
            unresolved_days: 0,
            pair_scoped: true,
            cooldown_days: 30,
            block_adds: true,
            block_removes: true,
        }
    }
}

/// Runtime knobs of the engine itself.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeSettings {
    pub debug: bool,
    /// Snapshot memoization TTL; 0 disables the cache.
    pub snapshot_ttl_sec: u64,
    pub suspect_min_prev: usize,
    pub suspect_shrink_ratio: f64,
    pub suspect_debug: bool,
    /// Items per provider write call; 0 means one unchunked call.
    pub apply_chunk_size: usize,
    pub apply_chunk_pause_ms: u64,
    /// Per-provider chunk-size overrides, keyed by upper-case name.
    pub apply_chunk_size_by_provider: BTreeMap<String, usize>,
    /// Optional label appended to pair-scoped cache filenames so separate
    /// deployments can share one state directory.
    pub pair_scope: Option<String>,
}

impl Default for RuntimeSettings {
    fn default() -> Self {
        RuntimeSettings {
            debug: false,
            snapshot_ttl_sec: 0,
            suspect_min_prev: 20,
            suspect_shrink_ratio: 0.10,
            suspect_debug: true,
            apply_chunk_size: 0,
            apply_chunk_pause_ms: 0,
            apply_chunk_size_by_provider: BTreeMap::new(),
            pair_scope: None,
        }
    }
}

impl RuntimeSettings {
    /// Effective chunk size for a provider: the per-provider override when
    /// one is set and positive, otherwise the global value.
    pub fn chunk_size_for(&self, provider: &str) -> usize {
        let key = provider.to_ascii_uppercase();
        match self.apply_chunk_size_by_provider.get(&key) {
            Some(&n) if n > 0 => n,
            _ => self.apply_chunk_size,
        }
    }
}

/// Telemetry thresholds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetrySettings {
    /// Per-provider remaining-rate floor below which `rate:low` is emitted.
    pub warn_rate_remaining: BTreeMap<String, i64>,
}

impl Default for TelemetrySettings {
    fn default() -> Self {
        let warn_rate_remaining = [
            ("TRAKT".to_string(), 100),
            ("SIMKL".to_string(), 50),
            ("PLEX".to_string(), 0),
            ("JELLYFIN".to_string(), 0),
        ]
        .into();
        TelemetrySettings { warn_rate_remaining }
    }
}

/// Direction of a configured pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SyncMode {
    #[serde(rename = "one-way")]
    OneWay,
    #[serde(rename = "two-way")]
    TwoWay,
}

impl Default for SyncMode {
    fn default() -> Self {
        SyncMode::OneWay
    }
}

/// One configured provider pair.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PairConfig {
    pub id: Option<String>,
    #[serde(default = "default_true")]
    pub enabled: bool,
    pub source: String,
    pub target: String,
    pub mode: SyncMode,
    /// Either a single feature name or `"multi"` to defer to `features`.
    pub feature: Option<String>,
    pub features: BTreeMap<SyncFeature, FeatureToggle>,
}

impl PairConfig {
    pub fn source_upper(&self) -> String {
        self.source.trim().to_ascii_uppercase()
    }

    pub fn target_upper(&self) -> String {
        self.target.trim().to_ascii_uppercase()
    }

    /// Resolve which features this pair runs:
    /// an explicit non-`multi` selector wins, then the enabled entries of
    /// the feature map, then the common defaults.
    pub fn feature_list(&self) -> Vec<SyncFeature> {
        if let Some(sel) = self.feature.as_deref() {
            let sel = sel.trim();
            if !sel.is_empty() && !sel.eq_ignore_ascii_case("multi") {
                return SyncFeature::parse(sel).into_iter().collect();
            }
        }
        if !self.features.is_empty() {
            return self
                .features
                .iter()
                .filter(|(_, t)| t.is_enabled())
                .map(|(f, _)| *f)
                .collect();
        }
        DEFAULT_FEATURES.to_vec()
    }

    /// True when the pair fell back to the default feature list.
    pub fn uses_default_features(&self) -> bool {
        let selector_multi = self
            .feature
            .as_deref()
            .map(|s| s.trim().is_empty() || s.eq_ignore_ascii_case("multi"))
            .unwrap_or(true);
        selector_multi && self.features.is_empty()
    }

    pub fn toggle_for(&self, feature: SyncFeature) -> Option<&FeatureToggle> {
        self.features.get(&feature)
    }
}

fn default_true() -> bool {
    true
}

/// Per-feature pair configuration: either a bare boolean or a table with
/// add/remove overrides and ratings filters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FeatureToggle {
    Enabled(bool),
    Options(FeatureOptions),
}

impl Default for FeatureToggle {
    fn default() -> Self {
        FeatureToggle::Enabled(true)
    }
}

impl FeatureToggle {
    pub fn is_enabled(&self) -> bool {
        match self {
            FeatureToggle::Enabled(b) => *b,
            FeatureToggle::Options(o) => o.enable,
        }
    }

    pub fn options(&self) -> Option<&FeatureOptions> {
        match self {
            FeatureToggle::Enabled(_) => None,
            FeatureToggle::Options(o) => Some(o),
        }
    }

    /// Add/remove gates: the feature-level override when present, else the
    /// sync-level defaults.
    pub fn resolve_gates(&self, sync: &SyncSettings) -> FeatureGates {
        let (add, remove) = match self {
            FeatureToggle::Enabled(_) => (None, None),
            FeatureToggle::Options(o) => (o.add, o.remove),
        };
        FeatureGates {
            allow_adds: add.unwrap_or(sync.enable_add),
            allow_removes: remove.unwrap_or(sync.enable_remove),
        }
    }
}

/// Expanded per-feature options.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FeatureOptions {
    pub enable: bool,
    pub add: Option<bool>,
    pub remove: Option<bool>,
    /// Ratings type allow-list (`movies`, `shows`, ... aliases accepted).
    pub types: Vec<String>,
    /// Ratings cutoff date, `YYYY-MM-DD`.
    pub from_date: Option<String>,
}

impl Default for FeatureOptions {
    fn default() -> Self {
        FeatureOptions {
            enable: true,
            add: None,
            remove: None,
            types: Vec::new(),
            from_date: None,
        }
    }
}

/// Resolved add/remove permissions for one feature of one pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeatureGates {
    pub allow_adds: bool,
    pub allow_removes: bool,
}

impl FeatureGates {
    /// Gates when a pair has no per-feature entry at all.
    pub fn from_sync(sync: &SyncSettings) -> FeatureGates {
        FeatureGates {
            allow_adds: sync.enable_add,
            allow_removes: sync.enable_remove,
        }
    }
}
