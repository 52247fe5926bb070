use std::fmt::Display;
use std::fmt::Formatter;

use serde::{Deserialize, Serialize};

/// Kind of a library item.
///
/// Provider payloads use a zoo of synonyms (`movies`, `series`, `tv`,
/// `anime`, ...); [`MediaKind::parse`] folds them all into these four
/// variants so the key algebra only ever sees one spelling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Movie,
    Show,
    Season,
    Episode,
}

impl MediaKind {
    /// Normalize a raw type string. Unknown or empty input falls back to
    /// `Movie`, matching how loosely-typed provider rows are treated.
    pub fn parse(raw: &str) -> MediaKind {
        MediaKind::try_parse(raw).unwrap_or(MediaKind::Movie)
    }

    /// Like [`MediaKind::parse`], but rejects unknown spellings instead of
    /// defaulting. Used where an unknown label must not silently widen a
    /// filter.
    pub fn try_parse(raw: &str) -> Option<MediaKind> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "movie" | "movies" => Some(MediaKind::Movie),
            "show" | "shows" | "series" | "tv" | "anime" => Some(MediaKind::Show),
            "season" | "seasons" => Some(MediaKind::Season),
            "episode" | "episodes" | "ep" | "eps" => Some(MediaKind::Episode),
            _ => None,
        }
    }

    /// The lowercase wire spelling, as used inside canonical keys.
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaKind::Movie => "movie",
            MediaKind::Show => "show",
            MediaKind::Season => "season",
            MediaKind::Episode => "episode",
        }
    }

    /// Seasons and episodes key off their parent show.
    pub fn is_show_scoped(&self) -> bool {
        matches!(self, MediaKind::Season | MediaKind::Episode)
    }
}

impl Default for MediaKind {
    fn default() -> Self {
        MediaKind::Movie
    }
}

impl Display for MediaKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
