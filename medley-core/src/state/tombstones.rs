use std::collections::{BTreeMap, BTreeSet};

use serde_json::json;

use medley_model::{MediaItem, canonical_key, keys_for_item};

use crate::events::Emitter;
use crate::state::now_epoch;
use crate::state::store::StateStore;

/// Canonical pair key: provider names uppercased, sorted, dash-joined.
pub fn pair_key(a: &str, b: &str) -> String {
    let mut names = [a.trim().to_ascii_uppercase(), b.trim().to_ascii_uppercase()];
    names.sort();
    names.join("-")
}

/// Record tombstone tokens for a feature, globally and (when a pair key is
/// given) pair-scoped. Existing entries keep their original timestamp.
pub fn mark_keys_for_feature(
    store: &StateStore,
    emitter: &Emitter,
    feature: &str,
    tokens: impl IntoIterator<Item = String>,
    pair: Option<&str>,
) -> usize {
    let mut doc = store.load_tombstones();
    let now = now_epoch();
    let mut added = 0;

    let mut prefixes = vec![feature.to_string()];
    if let Some(pair) = pair {
        prefixes.push(format!("{feature}:{pair}"));
    }

    for token in tokens {
        for prefix in &prefixes {
            let entry = format!("{prefix}|{token}");
            if !doc.keys.contains_key(&entry) {
                doc.keys.insert(entry, now);
                added += 1;
            }
        }
    }

    store.save_tombstones(&doc);
    emitter.dbg(
        "tombstones.marked",
        json!({
            "feature": feature,
            "added": added,
            "scope": if pair.is_some() { "global+pair" } else { "global" },
        }),
    );
    added
}

/// Collect tombstoned tokens for a feature, stripped of their prefixes.
/// Returns token → recorded-at epoch; pair-scoped entries override global
/// ones for the same token.
pub fn keys_for_feature(
    store: &StateStore,
    feature: &str,
    pair: Option<&str>,
    include_global: bool,
) -> BTreeMap<String, i64> {
    let doc = store.load_tombstones();
    let mut out = BTreeMap::new();

    let mut collect = |prefix: String| {
        let full = format!("{prefix}|");
        for (k, ts) in &doc.keys {
            if let Some(rest) = k.strip_prefix(&full) {
                out.insert(rest.to_string(), *ts);
            }
        }
    };

    if include_global {
        collect(feature.to_string());
    }
    if let Some(pair) = pair {
        collect(format!("{feature}:{pair}"));
    }
    out
}

/// Drop every tombstone older than the TTL. Returns how many went.
pub fn prune(store: &StateStore, emitter: &Emitter, older_than_secs: i64) -> usize {
    let mut doc = store.load_tombstones();
    if doc.keys.is_empty() {
        return 0;
    }
    let now = now_epoch();
    let before = doc.keys.len();
    doc.keys.retain(|_, ts| now - *ts < older_than_secs);
    let removed = before - doc.keys.len();
    doc.pruned_at = Some(now);
    store.save_tombstones(&doc);
    emitter.dbg(
        "tombstones.pruned",
        json!({ "removed": removed, "kept": doc.keys.len() }),
    );
    removed
}

/// Global bookkeeping after confirmed removals: tombstone the removed
/// keys for the feature.
pub fn cascade_removals(
    store: &StateStore,
    emitter: &Emitter,
    feature: &str,
    removed_keys: impl IntoIterator<Item = String>,
) -> usize {
    let tokens: Vec<String> = removed_keys.into_iter().filter(|k| !k.is_empty()).collect();
    if tokens.is_empty() {
        return 0;
    }
    mark_keys_for_feature(store, emitter, feature, tokens, None)
}

/// Alias tokens to tombstone for a removed item: its canonical key plus
/// one `kind:value` token per id it carries.
pub fn tokens_for_item(item: &MediaItem) -> BTreeSet<String> {
    let mut out = BTreeSet::new();
    out.insert(canonical_key(item));
    for (kind, value) in item.all_ids() {
        out.insert(format!("{kind}:{}", value.to_ascii_lowercase()));
    }
    out
}

/// Does the item hit the blocked-token set through its canonical key or
/// any alias key?
pub fn item_is_blocked(item: &MediaItem, blocked: &BTreeSet<String>) -> bool {
    if blocked.is_empty() {
        return false;
    }
    if blocked.contains(&canonical_key(item)) {
        return true;
    }
    keys_for_item(item).iter().any(|k| blocked.contains(k))
}
