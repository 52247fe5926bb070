use std::collections::BTreeMap;
use std::fmt::Display;
use std::fmt::Formatter;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// An external identifier namespace.
///
/// Declaration order is the canonical identifier order: it drives both the
/// `BTreeMap` key order of [`IdMap`] and the serialized order of id maps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IdKind {
    Imdb,
    Tmdb,
    Tvdb,
    Trakt,
    Simkl,
    Mal,
    Anilist,
    Kitsu,
    Anidb,
    Plex,
    Jellyfin,
    Guid,
    Slug,
}

/// Every identifier namespace an item may carry.
pub const ID_KINDS: [IdKind; 13] = [
    IdKind::Imdb,
    IdKind::Tmdb,
    IdKind::Tvdb,
    IdKind::Trakt,
    IdKind::Simkl,
    IdKind::Mal,
    IdKind::Anilist,
    IdKind::Kitsu,
    IdKind::Anidb,
    IdKind::Plex,
    IdKind::Jellyfin,
    IdKind::Guid,
    IdKind::Slug,
];

/// Preference order when picking the single id that names an item.
///
/// Jellyfin ids are deliberately absent: they are instance-local, so they
/// participate in alias matching but never become the canonical key.
pub const KEY_PRIORITY: [IdKind; 12] = [
    IdKind::Imdb,
    IdKind::Tmdb,
    IdKind::Tvdb,
    IdKind::Trakt,
    IdKind::Mal,
    IdKind::Anilist,
    IdKind::Kitsu,
    IdKind::Anidb,
    IdKind::Simkl,
    IdKind::Plex,
    IdKind::Guid,
    IdKind::Slug,
];

impl IdKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            IdKind::Imdb => "imdb",
            IdKind::Tmdb => "tmdb",
            IdKind::Tvdb => "tvdb",
            IdKind::Trakt => "trakt",
            IdKind::Simkl => "simkl",
            IdKind::Mal => "mal",
            IdKind::Anilist => "anilist",
            IdKind::Kitsu => "kitsu",
            IdKind::Anidb => "anidb",
            IdKind::Plex => "plex",
            IdKind::Jellyfin => "jellyfin",
            IdKind::Guid => "guid",
            IdKind::Slug => "slug",
        }
    }

    /// Parse a raw namespace label, tolerating case and surrounding space.
    pub fn parse(raw: &str) -> Option<IdKind> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "imdb" => Some(IdKind::Imdb),
            "tmdb" => Some(IdKind::Tmdb),
            "tvdb" => Some(IdKind::Tvdb),
            "trakt" => Some(IdKind::Trakt),
            "simkl" => Some(IdKind::Simkl),
            "mal" => Some(IdKind::Mal),
            "anilist" => Some(IdKind::Anilist),
            "kitsu" => Some(IdKind::Kitsu),
            "anidb" => Some(IdKind::Anidb),
            "plex" => Some(IdKind::Plex),
            "jellyfin" => Some(IdKind::Jellyfin),
            "guid" => Some(IdKind::Guid),
            "slug" => Some(IdKind::Slug),
            _ => None,
        }
    }

    /// Namespaces whose values are numeric and get reduced to digits.
    fn is_numeric(&self) -> bool {
        matches!(
            self,
            IdKind::Tmdb
                | IdKind::Tvdb
                | IdKind::Trakt
                | IdKind::Simkl
                | IdKind::Mal
                | IdKind::Anilist
                | IdKind::Kitsu
                | IdKind::Anidb
                | IdKind::Plex
                | IdKind::Jellyfin
        )
    }
}

impl Display for IdKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Normalized identifier map of an item.
pub type IdMap = BTreeMap<IdKind, String>;

/// Placeholder values that providers ship where they mean "no id".
const SENTINELS: [&str; 7] = ["", "none", "null", "nan", "undefined", "unknown", "0"];

static IMDB_RX: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(tt\d+)").unwrap());
static NON_DIGIT_RX: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\D+").unwrap());

fn norm_str(raw: &str) -> Option<&str> {
    let s = raw.trim();
    if s.is_empty() { None } else { Some(s) }
}

/// Normalize a single identifier value for its namespace.
///
/// Returns `None` for empty input and the usual sentinel spellings.
pub fn normalize_id(kind: IdKind, raw: &str) -> Option<String> {
    let s = norm_str(raw)?;
    if SENTINELS.contains(&s.to_ascii_lowercase().as_str()) {
        return None;
    }

    if kind.is_numeric() {
        let digits = NON_DIGIT_RX.replace_all(s, "");
        return if digits.is_empty() { None } else { Some(digits.into_owned()) };
    }

    match kind {
        IdKind::Imdb => {
            let lower = s.to_ascii_lowercase();
            if let Some(m) = IMDB_RX.find(&lower) {
                return Some(m.as_str().to_string());
            }
            let digits = NON_DIGIT_RX.replace_all(&lower, "");
            if digits.is_empty() { None } else { Some(format!("tt{digits}")) }
        }
        IdKind::Slug => Some(s.to_ascii_lowercase()),
        IdKind::Guid => Some(s.to_string()),
        _ => Some(s.to_string()),
    }
}

/// Strict variant of [`normalize_id`] for ingest paths that must not
/// silently drop identifiers.
pub fn parse_id(kind: IdKind, raw: &str) -> crate::error::Result<String> {
    normalize_id(kind, raw).ok_or_else(|| {
        crate::error::ModelError::InvalidIdentifier(format!("{kind}: {raw:?}"))
    })
}

/// Turn a loosely-typed JSON value into an id string worth normalizing.
fn value_to_id(v: &Value) -> Option<String> {
    match v {
        Value::String(s) => norm_str(s).map(str::to_string),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Collapse one or more raw `{namespace: value}` maps into a normalized
/// [`IdMap`]. Earlier maps win on conflict.
pub fn coalesce_ids<'a, I>(many: I) -> IdMap
where
    I: IntoIterator<Item = &'a BTreeMap<String, Value>>,
{
    let mut out = IdMap::new();
    for raw in many {
        for kind in ID_KINDS {
            if out.contains_key(&kind) {
                continue;
            }
            if let Some(v) = raw.get(kind.as_str())
                && let Some(s) = value_to_id(v)
                && let Some(n) = normalize_id(kind, &s)
            {
                out.insert(kind, n);
            }
        }
    }
    out
}

/// Re-normalize an already typed id map, dropping values that fail
/// normalization.
pub fn normalize_ids(ids: &IdMap) -> IdMap {
    let mut out = IdMap::new();
    for (kind, raw) in ids {
        if let Some(n) = normalize_id(*kind, raw) {
            out.insert(*kind, n);
        }
    }
    out
}

/// Merge two id maps: for every priority namespace prefer the existing
/// value and fill gaps from the new one, then sweep whatever namespaces
/// remain in either map.
pub fn merge_ids(old: &IdMap, new: &IdMap) -> IdMap {
    let mut out = IdMap::new();
    for kind in KEY_PRIORITY {
        let v = old
            .get(&kind)
            .and_then(|s| normalize_id(kind, s))
            .or_else(|| new.get(&kind).and_then(|s| normalize_id(kind, s)));
        if let Some(v) = v {
            out.insert(kind, v);
        }
    }
    for (kind, raw) in old.iter().chain(new.iter()) {
        if !out.contains_key(kind)
            && let Some(n) = normalize_id(*kind, raw)
        {
            out.insert(*kind, n);
        }
    }
    out
}

// --- GUID parsing -----------------------------------------------------------

static GUID_IMDB_AGENT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)com\.plexapp\.agents\.imdb://(tt\d+)").unwrap());
static GUID_TMDB_AGENT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)com\.plexapp\.agents\.themoviedb://(\d+)").unwrap());
static GUID_TVDB_AGENT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)com\.plexapp\.agents\.thetvdb://(\d+)").unwrap());
static GUID_IMDB: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)imdb://(?:title/)?(tt\d+)").unwrap());
static GUID_TMDB: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)tmdb://(?:(?:movie|show|tv)/)?(\d+)").unwrap());
static GUID_TVDB: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)tvdb://(?:(?:series|show|tv)/)?(\d+)").unwrap());
static GUID_PLEX: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)^plex://").unwrap());

/// Extract normalized ids out of a provider GUID string.
///
/// Understands the legacy agent schemes (`com.plexapp.agents.*`), the
/// generic `imdb://` / `tmdb://` / `tvdb://` schemes, and keeps raw
/// `plex://` GUIDs verbatim under [`IdKind::Guid`].
pub fn ids_from_guid(guid: &str) -> IdMap {
    let mut out = IdMap::new();
    let Some(g) = norm_str(guid) else {
        return out;
    };

    let captures: [(&LazyLock<Regex>, IdKind); 6] = [
        (&GUID_IMDB_AGENT, IdKind::Imdb),
        (&GUID_TMDB_AGENT, IdKind::Tmdb),
        (&GUID_TVDB_AGENT, IdKind::Tvdb),
        (&GUID_IMDB, IdKind::Imdb),
        (&GUID_TMDB, IdKind::Tmdb),
        (&GUID_TVDB, IdKind::Tvdb),
    ];
    for (rx, kind) in captures {
        if out.contains_key(&kind) {
            continue;
        }
        if let Some(caps) = rx.captures(g)
            && let Some(m) = caps.get(1)
            && let Some(n) = normalize_id(kind, m.as_str())
        {
            out.insert(kind, n);
        }
    }
    if GUID_PLEX.is_match(g) {
        out.insert(IdKind::Guid, g.to_string());
    }
    out
}

// --- Jellyfin ProviderIds ---------------------------------------------------

/// Map a Jellyfin-style `ProviderIds` object into normalized ids.
///
/// Keys arrive in several historical casings (`AniDB`, `Anidb`, `MAL`,
/// `MyAnimeList`, ...); anything unrecognized is ignored.
pub fn ids_from_provider_ids(pids: &BTreeMap<String, Value>) -> IdMap {
    fn kind_for(label: &str) -> Option<IdKind> {
        match label.to_ascii_lowercase().as_str() {
            "imdb" => Some(IdKind::Imdb),
            "tmdb" => Some(IdKind::Tmdb),
            "tvdb" => Some(IdKind::Tvdb),
            "trakt" => Some(IdKind::Trakt),
            "simkl" => Some(IdKind::Simkl),
            "anidb" => Some(IdKind::Anidb),
            "anilist" => Some(IdKind::Anilist),
            "kitsu" => Some(IdKind::Kitsu),
            "mal" | "myanimelist" => Some(IdKind::Mal),
            _ => None,
        }
    }

    let mut out = IdMap::new();
    for (k, v) in pids {
        let Some(kind) = kind_for(k) else { continue };
        if let Some(s) = value_to_id(v)
            && let Some(n) = normalize_id(kind, &s)
        {
            out.insert(kind, n);
        }
    }
    out
}

/// `kind:value` alias tokens for every id in the map, lowercased.
pub fn unified_keys_from_ids(ids: &IdMap) -> std::collections::BTreeSet<String> {
    let mut out = std::collections::BTreeSet::new();
    for (kind, raw) in ids {
        if let Some(n) = normalize_id(*kind, raw) {
            out.insert(format!("{kind}:{}", n.to_ascii_lowercase()));
        }
    }
    out
}

/// True when the two alias-key collections share at least one token.
pub fn any_key_overlap<'a, A, B>(a: A, b: B) -> bool
where
    A: IntoIterator<Item = &'a String>,
    B: IntoIterator<Item = &'a String>,
{
    let sa: std::collections::BTreeSet<&String> = a.into_iter().collect();
    if sa.is_empty() {
        return false;
    }
    b.into_iter().any(|k| sa.contains(k))
}

/// Does the map carry at least one of the widely-resolvable external ids?
pub fn has_external_ids(ids: &IdMap) -> bool {
    [IdKind::Imdb, IdKind::Tmdb, IdKind::Tvdb]
        .iter()
        .any(|k| ids.contains_key(k))
}

/// Id namespaces a given provider can resolve writes from.
///
/// Used to divert items a target could never match instead of burning
/// API calls on them.
pub fn has_ids_for(provider: &str, ids: &IdMap) -> bool {
    let kinds: &[IdKind] = match provider.to_ascii_uppercase().as_str() {
        "TRAKT" => &[IdKind::Trakt, IdKind::Tmdb, IdKind::Imdb, IdKind::Tvdb],
        "SIMKL" => &[IdKind::Imdb, IdKind::Tmdb, IdKind::Tvdb, IdKind::Slug],
        "PLEX" => &[
            IdKind::Plex,
            IdKind::Guid,
            IdKind::Imdb,
            IdKind::Tmdb,
            IdKind::Tvdb,
            IdKind::Trakt,
        ],
        "JELLYFIN" => &[
            IdKind::Jellyfin,
            IdKind::Imdb,
            IdKind::Tmdb,
            IdKind::Tvdb,
            IdKind::Slug,
        ],
        _ => &[IdKind::Tmdb, IdKind::Imdb, IdKind::Tvdb, IdKind::Trakt, IdKind::Slug],
    };
    kinds.iter().any(|k| ids.contains_key(k))
}
