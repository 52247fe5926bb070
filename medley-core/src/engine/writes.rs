use std::collections::{BTreeMap, BTreeSet};

use serde_json::json;

use medley_config::SyncFeature;
use medley_contracts::MediaAdapter;
use medley_model::{MediaItem, canonical_key};

use crate::context::SyncContext;
use crate::engine::applier::{apply_add, apply_remove};
use crate::engine::{HealthMap, pause_for};
use crate::state::Index;
use crate::state::phantoms::PhantomGuard;
use crate::state::skipped::write_skipped;
use crate::state::tombstones::{mark_keys_for_feature, tokens_for_item};

/// Result of one add cycle against a destination.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct AddCycleOutcome {
    /// Adds counted as real after pessimistic correction.
    pub effective: usize,
    /// Unresolved keys that appeared during this cycle.
    pub unresolved_new: usize,
    /// The provider call itself failed after retries.
    pub errored: bool,
}

/// Result of one removal cycle against a destination.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct RemoveCycleOutcome {
    pub removed: usize,
    pub errored: bool,
}

/// Apply a planned add list with unresolved-correction.
///
/// The unresolved key set is read before and after the write; anything
/// that appeared is attributed to this call. Without verify-after-write
/// any new unresolved key voids the whole count (strict pessimism) so a
/// half-landed batch can never inflate the baseline.
#[allow(clippy::too_many_arguments)]
pub(crate) async fn run_add_cycle(
    ctx: &SyncContext,
    adapter: &dyn MediaAdapter,
    dst: &str,
    feature: SyncFeature,
    adds: &[MediaItem],
    pair_key: &str,
    dst_down: bool,
    guard: &PhantomGuard,
    use_phantoms: bool,
    eff_index: &mut Index,
    health: &HealthMap,
    event_prefix: &str,
) -> AddCycleOutcome {
    if adds.is_empty() {
        return AddCycleOutcome::default();
    }
    let emitter = &ctx.emitter;
    let dry_run = ctx.dry_run_effective();

    if dst_down {
        ctx.unresolved
            .record_pending(dst, feature, adds, "provider_down:add");
        emitter.emit(
            "writes:skipped",
            json!({
                "dst": dst,
                "feature": feature,
                "reason": "provider_down",
                "op": "add",
                "count": adds.len(),
            }),
        );
        return AddCycleOutcome { effective: 0, unresolved_new: adds.len(), errored: false };
    }

    // Items carrying none of the id kinds this destination can resolve
    // would only burn API calls; divert them to the skip ledger instead.
    let (sendable, skipped): (Vec<MediaItem>, Vec<MediaItem>) = adds
        .iter()
        .cloned()
        .partition(|it| medley_model::has_ids_for(dst, &it.all_ids()));
    if !skipped.is_empty() {
        write_skipped(&ctx.store.cache_dir(), dst, feature, &skipped);
        emitter.dbg(
            "skipped.no_ids",
            json!({ "dst": dst, "feature": feature, "count": skipped.len() }),
        );
    }
    let adds = sendable.as_slice();
    if adds.is_empty() {
        return AddCycleOutcome::default();
    }

    let attempted: BTreeSet<String> = adds.iter().map(canonical_key).collect();
    let key_to_item: BTreeMap<String, MediaItem> = adds
        .iter()
        .map(|it| (canonical_key(it), it.minimal()))
        .collect();

    let before = ctx.unresolved.load_keys(dst, Some(feature), true);
    let applied = apply_add(
        adapter,
        &ctx.config,
        dst,
        feature,
        adds,
        dry_run,
        emitter,
        &ctx.unresolved,
        ctx.config.runtime.chunk_size_for(dst),
        pause_for(ctx, dst, health),
    )
    .await;

    let reason = format!("{event_prefix}:failed");
    let res = match applied {
        Ok(res) => res,
        Err(err) => {
            // Retries exhausted with nothing landed: everything attempted
            // is unresolved now.
            emitter.info(&format!("[!] {reason} dst={dst} feature={feature} error={err}"));
            ctx.unresolved.record_pending(dst, feature, adds, &reason);
            ctx.blackbox.record_attempts(
                dst,
                feature,
                attempted.iter(),
                &reason,
                "add",
                Some(pair_key),
                None,
            );
            return AddCycleOutcome { effective: 0, unresolved_new: adds.len(), errored: true };
        }
    };

    let after = ctx.unresolved.load_keys(dst, Some(feature), true);
    let new_unresolved: BTreeSet<String> = after.difference(&before).cloned().collect();

    let mut confirmed: Vec<String> = attempted
        .iter()
        .filter(|k| !new_unresolved.contains(*k))
        .cloned()
        .collect();

    let verify = ctx.config.sync.verify_after_write && adapter.capabilities().verify_after_write;
    if verify {
        let again = ctx.unresolved.load_keys(dst, Some(feature), true);
        confirmed.retain(|k| !again.contains(k));
    }

    let effective = if verify {
        confirmed.len()
    } else if !new_unresolved.is_empty() {
        0
    } else {
        res.count.min(confirmed.len())
    };

    if effective != res.count {
        emitter.dbg(
            &format!("{event_prefix}:corrected"),
            json!({
                "dst": dst,
                "feature": feature,
                "provider_count": res.count,
                "effective": effective,
                "newly_unresolved": new_unresolved.len(),
            }),
        );
    }

    let failed: Vec<String> = attempted
        .iter()
        .filter(|k| !confirmed.contains(*k))
        .cloned()
        .collect();
    if !failed.is_empty() {
        ctx.blackbox
            .record_attempts(dst, feature, failed.iter(), &reason, "add", Some(pair_key), None);
        let failed_items: Vec<MediaItem> =
            failed.iter().filter_map(|k| key_to_item.get(k).cloned()).collect();
        if !failed_items.is_empty() {
            ctx.unresolved
                .record_pending(dst, feature, &failed_items, "apply:add:failed");
        }
    }
    if !confirmed.is_empty() {
        ctx.blackbox.record_success(dst, feature, confirmed.iter());
        if use_phantoms && effective > 0 {
            guard.record_success(confirmed[..effective.min(confirmed.len())].iter());
        }
    }

    if effective > 0 && !dry_run {
        for key in confirmed.iter().take(effective) {
            if let Some(item) = key_to_item.get(key) {
                eff_index.insert(key.clone(), item.clone());
            }
        }
    }

    AddCycleOutcome { effective, unresolved_new: new_unresolved.len(), errored: false }
}

/// Apply a planned removal list.
///
/// Confirmed removals are tombstoned under both the global and the
/// pair-scoped prefix, for the canonical key and every id alias, before
/// the effective baseline is pruned.
#[allow(clippy::too_many_arguments)]
pub(crate) async fn run_remove_cycle(
    ctx: &SyncContext,
    adapter: &dyn MediaAdapter,
    dst: &str,
    feature: SyncFeature,
    removes: &[MediaItem],
    pair_key: &str,
    dst_down: bool,
    eff_index: &mut Index,
    health: &HealthMap,
    prune_by_count: bool,
) -> RemoveCycleOutcome {
    if removes.is_empty() {
        return RemoveCycleOutcome::default();
    }
    let emitter = &ctx.emitter;
    let dry_run = ctx.dry_run_effective();

    if dst_down {
        ctx.unresolved
            .record_pending(dst, feature, removes, "provider_down:remove");
        emitter.emit(
            "writes:skipped",
            json!({
                "dst": dst,
                "feature": feature,
                "reason": "provider_down",
                "op": "remove",
                "count": removes.len(),
            }),
        );
        return RemoveCycleOutcome::default();
    }

    let rem_keys: Vec<String> = removes.iter().map(|it| canonical_key(&it.minimal())).collect();

    let applied = apply_remove(
        adapter,
        &ctx.config,
        dst,
        feature,
        removes,
        dry_run,
        emitter,
        &ctx.unresolved,
        ctx.config.runtime.chunk_size_for(dst),
        pause_for(ctx, dst, health),
    )
    .await;

    let removed = match applied {
        Ok(res) => res.count,
        Err(err) => {
            emitter.info(&format!(
                "[!] apply:remove:failed dst={dst} feature={feature} error={err}"
            ));
            ctx.unresolved
                .record_pending(dst, feature, removes, "apply:remove:failed");
            return RemoveCycleOutcome { removed: 0, errored: true };
        }
    };

    if removed > 0 && !dry_run {
        let mut tokens: BTreeSet<String> = BTreeSet::new();
        for item in removes {
            tokens.extend(tokens_for_item(item));
        }
        mark_keys_for_feature(
            &ctx.store,
            emitter,
            feature.as_str(),
            tokens,
            Some(pair_key),
        );

        if prune_by_count {
            let mut pruned = 0;
            for key in &rem_keys {
                if eff_index.remove(key).is_some() {
                    pruned += 1;
                    if pruned >= removed {
                        break;
                    }
                }
            }
        } else {
            for key in &rem_keys {
                eff_index.remove(key);
            }
        }
    }

    RemoveCycleOutcome { removed, errored: false }
}
