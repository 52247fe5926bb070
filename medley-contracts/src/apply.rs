use serde::{Deserialize, Serialize};

use medley_model::MediaItem;

/// Result of an adapter write call.
///
/// `count` is the number of items the provider claims it applied; items it
/// could not resolve come back in `unresolved` and are persisted by the
/// orchestrator. A provider must never silently drop items: everything not
/// counted belongs in `unresolved`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApplyOutcome {
    pub ok: bool,
    pub count: usize,
    pub unresolved: Vec<MediaItem>,
}

impl Default for ApplyOutcome {
    fn default() -> Self {
        ApplyOutcome {
            ok: true,
            count: 0,
            unresolved: Vec::new(),
        }
    }
}

impl ApplyOutcome {
    /// A fully-applied outcome.
    pub fn done(count: usize) -> ApplyOutcome {
        ApplyOutcome {
            ok: true,
            count,
            unresolved: Vec::new(),
        }
    }

    /// Fold another chunk's outcome into this one.
    pub fn absorb(&mut self, other: ApplyOutcome) {
        self.ok = self.ok && other.ok;
        self.count += other.count;
        self.unresolved.extend(other.unresolved);
    }
}

/// Per-feature progress hints used as checkpoints by the suspect-shrink
/// guard. All fields are opaque provider-supplied strings, usually
/// timestamps.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Activities {
    pub watchlist: Option<String>,
    /// Plan-to-watch activity; some services track watchlists under it.
    pub ptw: Option<String>,
    pub ratings: Option<String>,
    pub history: Option<String>,
    pub updated_at: Option<String>,
}

impl Activities {
    /// The checkpoint hint for a feature, with per-feature fallbacks down
    /// to the generic `updated_at`.
    pub fn checkpoint_for(&self, feature: medley_config::SyncFeature) -> Option<String> {
        use medley_config::SyncFeature::*;
        let specific = match feature {
            Watchlist => self.watchlist.clone().or_else(|| self.ptw.clone()),
            Ratings => self.ratings.clone(),
            History => self.history.clone(),
            Playlists => None,
        };
        specific.or_else(|| self.updated_at.clone())
    }
}
