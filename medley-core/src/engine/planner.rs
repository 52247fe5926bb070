use medley_config::FeatureOptions;
use medley_model::{MediaItem, MediaKind};

use crate::state::Index;

/// Presence diff on canonical keys.
///
/// `adds` are the minimal forms of source items the destination lacks;
/// `removes` the destination items the source lacks. Order follows the
/// canonical-key order of the input indexes.
pub fn diff(src_idx: &Index, dst_idx: &Index) -> (Vec<MediaItem>, Vec<MediaItem>) {
    let adds = src_idx
        .iter()
        .filter(|(k, _)| !dst_idx.contains_key(*k))
        .map(|(_, v)| v.minimal())
        .collect();
    let removes = dst_idx
        .iter()
        .filter(|(k, _)| !src_idx.contains_key(*k))
        .map(|(_, v)| v.minimal())
        .collect();
    (adds, removes)
}

fn pack_with_rating(item: &MediaItem, rating: u8) -> MediaItem {
    let mut out = item.minimal();
    out.rating = Some(rating as f64);
    out
}

/// Ratings diff.
///
/// For every rated source item, emit an upsert when the destination lacks
/// it, rates it differently, or (with `propagate_timestamp_updates`) has a
/// strictly older `rated_at`. Destination-only rated items become unrates.
pub fn diff_ratings(
    src_idx: &Index,
    dst_idx: &Index,
    propagate_timestamp_updates: bool,
) -> (Vec<MediaItem>, Vec<MediaItem>) {
    let mut upserts = Vec::new();
    let mut unrates = Vec::new();

    for (key, sv) in src_idx {
        let Some(rs) = sv.normalized_rating() else {
            continue;
        };
        match dst_idx.get(key) {
            None => upserts.push(pack_with_rating(sv, rs)),
            Some(dv) => {
                let rd = dv.normalized_rating();
                if rd != Some(rs) {
                    upserts.push(pack_with_rating(sv, rs));
                } else if propagate_timestamp_updates
                    && let (Some(ts_s), Some(ts_d)) = (sv.rated_at_epoch(), dv.rated_at_epoch())
                    && ts_s > ts_d
                {
                    upserts.push(pack_with_rating(sv, rs));
                }
            }
        }
    }

    for (key, dv) in dst_idx {
        if !src_idx.contains_key(key) && dv.normalized_rating().is_some() {
            unrates.push(dv.minimal());
        }
    }

    (upserts, unrates)
}

/// Drop rated items outside the configured type allow-list or older than
/// the `from_date` cutoff. Items without a timestamp survive the date
/// filter; over-filtering loses data, staleness does not.
pub fn ratings_filter_index(idx: &Index, options: Option<&FeatureOptions>) -> Index {
    let Some(options) = options else {
        return idx.clone();
    };

    let allowed: std::collections::BTreeSet<MediaKind> = options
        .types
        .iter()
        .filter_map(|t| MediaKind::try_parse(t))
        .collect();
    let from_date = options
        .from_date
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty());

    idx.iter()
        .filter(|(_, item)| {
            if !allowed.is_empty() && !allowed.contains(&item.kind) {
                return false;
            }
            if let Some(cutoff) = from_date {
                let Some(rated_at) = item.rated_at.as_deref().map(str::trim).filter(|s| !s.is_empty())
                else {
                    return true;
                };
                let prefix = rated_at.get(..10).unwrap_or(rated_at);
                if prefix < cutoff {
                    return false;
                }
            }
            true
        })
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}
