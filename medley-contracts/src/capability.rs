use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use medley_config::SyncFeature;

/// How a provider's `build_index` output relates to its full inventory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IndexSemantics {
    /// The snapshot is the complete present state.
    Present,
    /// The snapshot only carries changes; the previous baseline must be
    /// merged in before planning.
    Delta,
}

impl Default for IndexSemantics {
    fn default() -> Self {
        IndexSemantics::Present
    }
}

/// What a provider's ratings surface can do.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RatingsCapabilities {
    /// Item types the provider rates (`movies`, `shows`, ...).
    pub types: Vec<String>,
    pub upsert: bool,
    pub unrate: bool,
    pub from_date: bool,
    /// The service rates out of five stars; values need doubling.
    pub five_star: bool,
}

/// Static capabilities advertised by an adapter.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Capabilities {
    pub features: BTreeMap<SyncFeature, bool>,
    /// `Some(false)` disables observed-deletion inference pair-wide.
    pub observed_deletes: Option<bool>,
    pub index_semantics: IndexSemantics,
    pub verify_after_write: bool,
    pub ratings: Option<RatingsCapabilities>,
}

impl Capabilities {
    /// Whether the provider can sync a feature. An absent entry counts as
    /// supported, so adapters only have to list their exceptions.
    pub fn supports(&self, feature: SyncFeature) -> bool {
        self.features.get(&feature).copied().unwrap_or(true)
    }
}
