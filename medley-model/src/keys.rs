use std::collections::BTreeSet;

use crate::ids::{IdMap, KEY_PRIORITY};
use crate::item::MediaItem;
use crate::media_kind::MediaKind;

/// `kind:value` token for the highest-priority id present, lowercased.
pub fn best_id_key(ids: &IdMap) -> Option<String> {
    for kind in KEY_PRIORITY {
        if let Some(v) = ids.get(&kind) {
            return Some(format!("{kind}:{}", v.to_ascii_lowercase()));
        }
    }
    None
}

/// Title/year fallback token, e.g. `movie|title:some indie|year:2024`.
///
/// Requires a title; the year slot stays empty when unknown so the token
/// remains comparable across providers that drop the year.
pub fn title_year_key(item: &MediaItem) -> Option<String> {
    let title = item.title.as_deref().map(str::trim).filter(|t| !t.is_empty())?;
    let year = item.year.map(|y| y.to_string()).unwrap_or_default();
    Some(format!(
        "{}|title:{}|year:{}",
        item.kind.as_str(),
        title.to_ascii_lowercase(),
        year
    ))
}

/// Season/episode fragment: `#season:N` for seasons, `#sNNeMM` for episodes.
fn se_fragment(item: &MediaItem) -> Option<String> {
    let season = item.season?;
    if item.kind == MediaKind::Season {
        return Some(format!("#season:{season}"));
    }
    let episode = item.episode?;
    Some(format!("#s{season:02}e{episode:02}"))
}

/// Best id token of the parent show, falling back to the item's own ids.
fn show_id_key(item: &MediaItem) -> Option<String> {
    if let Some(sids) = item.normalized_show_ids()
        && let Some(k) = best_id_key(&sids)
    {
        return Some(k);
    }
    best_id_key(&item.all_ids())
}

/// Deterministic canonical key of an item.
///
/// Seasons and episodes key off their parent show plus a fragment; other
/// items take their best id, then the title/year fallback. Total: items
/// with nothing usable map to `"unknown:"` rather than failing.
pub fn canonical_key(item: &MediaItem) -> String {
    if item.kind.is_show_scoped()
        && let Some(show_id) = show_id_key(item)
        && let Some(frag) = se_fragment(item)
    {
        return format!("{show_id}{frag}").to_ascii_lowercase();
    }
    if let Some(id_key) = best_id_key(&item.all_ids()) {
        return id_key;
    }
    title_year_key(item).unwrap_or_else(|| "unknown:".to_string())
}

/// Every token the item can be cross-referenced by: one `kind:value` per
/// id, the title/year fallback, and the show-scoped composite when
/// applicable. Tombstone and presence checks match against this set.
pub fn keys_for_item(item: &MediaItem) -> BTreeSet<String> {
    let mut out = crate::ids::unified_keys_from_ids(&item.all_ids());
    if let Some(ty) = title_year_key(item) {
        out.insert(ty);
    }
    if item.kind.is_show_scoped()
        && let Some(sid) = show_id_key(item)
        && let Some(frag) = se_fragment(item)
    {
        out.insert(format!("{sid}{frag}").to_ascii_lowercase());
    }
    out
}

/// Best id token of an id map on its own, without the item context.
pub fn preferred_id_key(ids: &IdMap) -> Option<String> {
    best_id_key(&crate::ids::normalize_ids(ids))
}
