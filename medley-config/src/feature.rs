use std::fmt::Display;
use std::fmt::Formatter;

use serde::{Deserialize, Serialize};

/// A synchronizable inventory feature.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncFeature {
    Watchlist,
    Ratings,
    History,
    Playlists,
}

/// Features a pair runs when no explicit selection is configured.
pub const DEFAULT_FEATURES: [SyncFeature; 4] = [
    SyncFeature::Watchlist,
    SyncFeature::Ratings,
    SyncFeature::History,
    SyncFeature::Playlists,
];

impl SyncFeature {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncFeature::Watchlist => "watchlist",
            SyncFeature::Ratings => "ratings",
            SyncFeature::History => "history",
            SyncFeature::Playlists => "playlists",
        }
    }

    pub fn parse(raw: &str) -> Option<SyncFeature> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "watchlist" => Some(SyncFeature::Watchlist),
            "ratings" => Some(SyncFeature::Ratings),
            "history" => Some(SyncFeature::History),
            "playlists" => Some(SyncFeature::Playlists),
            _ => None,
        }
    }
}

impl Display for SyncFeature {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_round_trips() {
        for f in DEFAULT_FEATURES {
            assert_eq!(SyncFeature::parse(f.as_str()), Some(f));
        }
        assert_eq!(SyncFeature::parse("Watchlist "), Some(SyncFeature::Watchlist));
        assert_eq!(SyncFeature::parse("multi"), None);
    }
}
