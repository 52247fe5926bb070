use std::collections::{BTreeMap, BTreeSet};

use serde_json::json;

use medley_config::{FeatureGates, FeatureToggle, SyncFeature};
use medley_contracts::IndexSemantics;
use medley_model::{MediaItem, canonical_key};

use crate::context::SyncContext;
use crate::engine::blocklist::apply_blocklist;
use crate::engine::massdelete::maybe_block_mass_delete;
use crate::engine::planner::{diff_ratings, ratings_filter_index};
use crate::engine::snapshots::{
    build_snapshots_for_feature, coerce_suspect_snapshot, module_checkpoint, prev_checkpoint,
};
use crate::engine::writes::{run_add_cycle, run_remove_cycle};
use crate::engine::{HealthMap, health_of};
use crate::state::phantoms::PhantomGuard;
use crate::state::tombstones::{cascade_removals, mark_keys_for_feature, pair_key};
use crate::state::{Index, now_epoch};

/// Detailed roll-up of one two-way feature cycle.
#[derive(Debug, Clone, Copy, Default)]
pub struct TwoWayOutcome {
    pub ok: bool,
    pub adds_to_a: usize,
    pub adds_to_b: usize,
    pub rem_from_a: usize,
    pub rem_from_b: usize,
    pub unresolved_to_a: usize,
    pub unresolved_to_b: usize,
    pub unresolved: usize,
    pub skipped: usize,
    pub errors: usize,
}

impl TwoWayOutcome {
    fn skipped_cycle(ok: bool) -> TwoWayOutcome {
        TwoWayOutcome { ok, ..Default::default() }
    }
}

/// `kind:value` alias → canonical key, over a whole index.
fn alias_index(idx: &Index) -> BTreeMap<String, String> {
    let mut out = BTreeMap::new();
    for (ck, item) in idx {
        for (kind, value) in item.all_ids() {
            out.insert(format!("{kind}:{}", value.to_ascii_lowercase()), ck.clone());
        }
    }
    out
}

/// Alias-aware presence: the item counts as present when its canonical
/// key is in the index or any of its id tokens maps there. Two services
/// exposing different id subsets for the same title must not trade adds
/// forever.
fn present(idx: &Index, alias: &BTreeMap<String, String>, item: &MediaItem) -> bool {
    if idx.contains_key(&canonical_key(item)) {
        return true;
    }
    item.all_ids()
        .iter()
        .any(|(kind, value)| alias.contains_key(&format!("{kind}:{}", value.to_ascii_lowercase())))
}

/// Two-way sync driver (A ↔ B) for a single feature.
///
/// Observed deletions are inferred from baseline-vs-snapshot differences
/// and recorded as tombstones; removals only happen when a tombstone or a
/// fresh observation proves a genuine delete, otherwise the item is added
/// to the lacking side. Bootstrap cycles (no baselines, no tombstones)
/// never remove.
pub async fn run_two_way_feature(
    ctx: &SyncContext,
    a: &str,
    b: &str,
    feature: SyncFeature,
    toggle: Option<&FeatureToggle>,
    health: &HealthMap,
) -> TwoWayOutcome {
    let emitter = ctx.emitter.clone();
    let a = a.trim().to_ascii_uppercase();
    let b = b.trim().to_ascii_uppercase();

    emitter.emit(
        "feature:start",
        json!({ "src": a, "dst": b, "feature": feature }),
    );
    let res = two_way_sync(ctx, &a, &b, feature, toggle, health).await;
    emitter.emit(
        "feature:done",
        json!({ "src": a, "dst": b, "feature": feature }),
    );
    res
}

async fn two_way_sync(
    ctx: &SyncContext,
    a: &str,
    b: &str,
    feature: SyncFeature,
    toggle: Option<&FeatureToggle>,
    health: &HealthMap,
) -> TwoWayOutcome {
    let emitter = ctx.emitter.clone();
    let sync_cfg = &ctx.config.sync;
    let runtime = &ctx.config.runtime;

    let (Some(a_ops), Some(b_ops)) = (ctx.providers.get(a), ctx.providers.get(b)) else {
        emitter.info(&format!("[!] Missing provider ops for {a}<->{b}"));
        return TwoWayOutcome::skipped_cycle(false);
    };

    let gates = toggle
        .map(|t| t.resolve_gates(sync_cfg))
        .unwrap_or_else(|| FeatureGates::from_sync(sync_cfg));
    let allow_adds = gates.allow_adds;
    let allow_removes = gates.allow_removes;

    let a_health = health_of(health, a);
    let b_health = health_of(health, b);
    if a_health.is_auth_failed() || b_health.is_auth_failed() {
        emitter.emit(
            "pair:skip",
            json!({
                "a": a,
                "b": b,
                "feature": feature,
                "reason": "auth_failed",
                "a_status": a_health.status,
                "b_status": b_health.status,
            }),
        );
        return TwoWayOutcome::skipped_cycle(false);
    }
    let a_down = a_health.is_down();
    let b_down = b_health.is_down();

    let a_caps = a_ops.capabilities();
    let b_caps = b_ops.capabilities();

    let pair = pair_key(a, b);
    let mut include_observed = sync_cfg.include_observed_deletes;
    if a_down || b_down {
        include_observed = false;
    }
    if a_caps.observed_deletes == Some(false) || b_caps.observed_deletes == Some(false) {
        include_observed = false;
        emitter.dbg(
            "observed.deletions.forced_off",
            json!({ "feature": feature, "pair": pair, "reason": "provider_capability" }),
        );
    }

    let a_supported = a_caps.supports(feature) && a_health.feature_ok(feature);
    let b_supported = b_caps.supports(feature) && b_health.feature_ok(feature);
    if !a_supported || !b_supported {
        emitter.emit(
            "feature:unsupported",
            json!({
                "a": a,
                "b": b,
                "feature": feature,
                "a_supported": a_supported,
                "b_supported": b_supported,
            }),
        );
        return TwoWayOutcome::skipped_cycle(true);
    }

    emitter.emit(
        "two:start",
        json!({ "a": a, "b": b, "feature": feature, "removals": allow_removes }),
    );

    // Snapshots, baselines, checkpoints.
    let snaps = build_snapshots_for_feature(
        feature,
        &ctx.config,
        &ctx.providers,
        &ctx.snapshots,
        ctx.snapshot_ttl(),
        &emitter,
    )
    .await;
    let a_cur = snaps.get(a).cloned().unwrap_or_default();
    let b_cur = snaps.get(b).cloned().unwrap_or_default();

    let prev_state = ctx.store.load_state();
    let prev_a = prev_state.baseline_items(a, feature);
    let prev_b = prev_state.baseline_items(b, feature);

    let now_cp_a = module_checkpoint(a_ops.as_ref(), &ctx.config, feature).await;
    let now_cp_b = module_checkpoint(b_ops.as_ref(), &ctx.config, feature).await;

    let (a_guarded, a_suspect, b_guarded, b_suspect) = if sync_cfg.drop_guard {
        let va = coerce_suspect_snapshot(
            a,
            a_caps.index_semantics,
            &prev_a,
            &a_cur,
            feature,
            runtime.suspect_min_prev,
            runtime.suspect_shrink_ratio,
            runtime.suspect_debug,
            &emitter,
            prev_checkpoint(&prev_state, a, feature).as_deref(),
            now_cp_a.as_deref(),
        );
        if va.suspect {
            emitter.dbg(
                "snapshot.guard",
                json!({ "provider": a, "feature": feature, "reason": va.reason }),
            );
        }
        let vb = coerce_suspect_snapshot(
            b,
            b_caps.index_semantics,
            &prev_b,
            &b_cur,
            feature,
            runtime.suspect_min_prev,
            runtime.suspect_shrink_ratio,
            runtime.suspect_debug,
            &emitter,
            prev_checkpoint(&prev_state, b, feature).as_deref(),
            now_cp_b.as_deref(),
        );
        if vb.suspect {
            emitter.dbg(
                "snapshot.guard",
                json!({ "provider": b, "feature": feature, "reason": vb.reason }),
            );
        }
        (va.index, va.suspect, vb.index, vb.suspect)
    } else {
        emitter.emit(
            "drop_guard:skipped",
            json!({ "a": a, "b": b, "feature": feature }),
        );
        (a_cur.clone(), false, b_cur.clone(), false)
    };

    let mut a_eff: Index = if a_caps.index_semantics == IndexSemantics::Delta {
        let mut merged = prev_a.clone();
        merged.extend(a_cur.clone());
        merged
    } else {
        a_guarded
    };
    let mut b_eff: Index = if b_caps.index_semantics == IndexSemantics::Delta {
        let mut merged = prev_b.clone();
        merged.extend(b_cur.clone());
        merged
    } else {
        b_guarded
    };

    // Live tombstones for this feature and pair.
    let now = now_epoch();
    let tomb_ttl_secs = sync_cfg.tombstone_ttl_days.max(1) * 24 * 3600;
    let tomb: BTreeSet<String> =
        crate::state::tombstones::keys_for_feature(&ctx.store, feature.as_str(), Some(&pair), true)
            .into_iter()
            .filter(|(_, ts)| now - *ts <= tomb_ttl_secs)
            .map(|(k, _)| k)
            .collect();

    let bootstrap = prev_a.is_empty() && prev_b.is_empty() && tomb.is_empty();

    // Observed-deletion inference.
    let mut obs_a: BTreeSet<String> = BTreeSet::new();
    let mut obs_b: BTreeSet<String> = BTreeSet::new();
    if include_observed && !bootstrap {
        if !a_suspect {
            obs_a = prev_a
                .keys()
                .filter(|k| !a_cur.contains_key(*k))
                .cloned()
                .collect();
        }
        if !b_suspect {
            obs_b = prev_b
                .keys()
                .filter(|k| !b_cur.contains_key(*k))
                .cloned()
                .collect();
        }
        let newly: BTreeSet<String> =
            obs_a.union(&obs_b).filter(|k| !tomb.contains(*k)).cloned().collect();

        if !newly.is_empty() {
            let mut tokens: BTreeSet<String> = BTreeSet::new();
            for ck in &newly {
                tokens.insert(ck.clone());
                if let Some(item) = prev_a.get(ck).or_else(|| prev_b.get(ck)) {
                    for (kind, value) in item.all_ids() {
                        tokens.insert(format!("{kind}:{}", value.to_ascii_lowercase()));
                    }
                }
            }
            mark_keys_for_feature(&ctx.store, &emitter, feature.as_str(), tokens, Some(&pair));
        }

        emitter.dbg(
            "observed.deletions",
            json!({
                "a": obs_a.len(),
                "b": obs_b.len(),
                "tomb": tomb.len(),
                "suppressed_on_A": a_suspect,
                "suppressed_on_B": b_suspect,
            }),
        );
    } else if !include_observed {
        emitter.dbg(
            "observed.deletions.disabled",
            json!({ "feature": feature, "pair": pair }),
        );
    }

    // Observed-gone items drop out of the effective baselines.
    for k in &obs_a {
        a_eff.remove(k);
    }
    for k in &obs_b {
        b_eff.remove(k);
    }

    let a_alias = alias_index(&a_eff);
    let b_alias = alias_index(&b_eff);

    // Planning.
    let mut add_to_a: Vec<MediaItem> = Vec::new();
    let mut add_to_b: Vec<MediaItem> = Vec::new();
    let mut rem_from_a: Vec<MediaItem> = Vec::new();
    let mut rem_from_b: Vec<MediaItem> = Vec::new();

    if feature == SyncFeature::Ratings {
        let options = toggle.and_then(|t| t.options());
        let a_f = ratings_filter_index(&a_eff, options);
        let b_f = ratings_filter_index(&b_eff, options);

        let (up_b, _) = diff_ratings(&a_f, &b_f, false);
        let (up_a, _) = diff_ratings(&b_f, &a_f, false);
        if allow_adds {
            add_to_a = up_a.iter().map(MediaItem::minimal).collect();
            add_to_b = up_b.iter().map(MediaItem::minimal).collect();
        }

        // Unrating is destructive; require proof of a real delete.
        if allow_removes {
            for item in a_f.values() {
                let ck = canonical_key(item);
                if !present(&b_f, &b_alias, item) && (tomb.contains(&ck) || obs_b.contains(&ck)) {
                    rem_from_a.push(item.minimal());
                }
            }
            for item in b_f.values() {
                let ck = canonical_key(item);
                if !present(&a_f, &a_alias, item) && (tomb.contains(&ck) || obs_a.contains(&ck)) {
                    rem_from_b.push(item.minimal());
                }
            }
        }
    } else {
        for item in a_eff.values() {
            if present(&b_eff, &b_alias, item) {
                continue;
            }
            let ck = canonical_key(item);
            if allow_removes && (tomb.contains(&ck) || obs_b.contains(&ck)) {
                rem_from_a.push(item.minimal());
            } else {
                add_to_b.push(item.minimal());
            }
        }
        for item in b_eff.values() {
            if present(&a_eff, &a_alias, item) {
                continue;
            }
            let ck = canonical_key(item);
            if allow_removes && (tomb.contains(&ck) || obs_a.contains(&ck)) {
                rem_from_b.push(item.minimal());
            } else {
                add_to_a.push(item.minimal());
            }
        }
    }

    if !allow_adds {
        add_to_a.clear();
        add_to_b.clear();
    }
    if !allow_removes {
        rem_from_a.clear();
        rem_from_b.clear();
    }
    if bootstrap && allow_removes {
        rem_from_a.clear();
        rem_from_b.clear();
        emitter.dbg("bootstrap.no-delete", json!({ "a": a, "b": b }));
    }

    // Items already pending against a target are not worth re-planning.
    let unresolved_a = ctx.unresolved.load_keys(a, Some(feature), true);
    let unresolved_b = ctx.unresolved.load_keys(b, Some(feature), true);
    let pre_a = add_to_a.len();
    let pre_b = add_to_b.len();
    add_to_a.retain(|it| !unresolved_a.contains(&canonical_key(it)));
    add_to_b.retain(|it| !unresolved_b.contains(&canonical_key(it)));
    for (dst, blocked) in [(a, pre_a - add_to_a.len()), (b, pre_b - add_to_b.len())] {
        if blocked > 0 {
            emitter.dbg(
                "blocked.counts",
                json!({
                    "feature": feature,
                    "dst": dst,
                    "pair": pair,
                    "blocked_unresolved": blocked,
                    "blocked_total": blocked,
                }),
            );
        }
    }

    add_to_a = apply_blocklist(
        &ctx.store,
        &ctx.unresolved,
        &ctx.blackbox,
        add_to_a,
        a,
        feature,
        Some(&pair),
        &emitter,
    );
    add_to_b = apply_blocklist(
        &ctx.store,
        &ctx.unresolved,
        &ctx.blackbox,
        add_to_b,
        b,
        feature,
        Some(&pair),
        &emitter,
    );

    let bb_cfg = &sync_cfg.blackbox;
    let use_phantoms = bb_cfg.enabled && bb_cfg.block_adds;
    let guard_a = PhantomGuard::new(
        ctx.store.cache_dir(),
        b,
        a,
        feature,
        Some(bb_cfg.cooldown_days),
        use_phantoms,
        ctx.pair_scope(),
    );
    let guard_b = PhantomGuard::new(
        ctx.store.cache_dir(),
        a,
        b,
        feature,
        Some(bb_cfg.cooldown_days),
        use_phantoms,
        ctx.pair_scope(),
    );
    if use_phantoms && !add_to_a.is_empty() {
        let (kept, _) = guard_a.filter_adds(add_to_a, &ctx.blackbox, a, feature, &pair, &emitter);
        add_to_a = kept;
    }
    if use_phantoms && !add_to_b.is_empty() {
        let (kept, _) = guard_b.filter_adds(add_to_b, &ctx.blackbox, b, feature, &pair, &emitter);
        add_to_b = kept;
    }

    rem_from_a = maybe_block_mass_delete(
        rem_from_a,
        a_eff.len(),
        sync_cfg.allow_mass_delete,
        runtime.suspect_shrink_ratio,
        &emitter,
        a,
        feature.as_str(),
    );
    rem_from_b = maybe_block_mass_delete(
        rem_from_b,
        b_eff.len(),
        sync_cfg.allow_mass_delete,
        runtime.suspect_shrink_ratio,
        &emitter,
        b,
        feature.as_str(),
    );

    emitter.emit(
        "two:plan",
        json!({
            "a": a,
            "b": b,
            "feature": feature,
            "add_to_A": add_to_a.len(),
            "add_to_B": add_to_b.len(),
            "rem_from_A": rem_from_a.len(),
            "rem_from_B": rem_from_b.len(),
        }),
    );

    let mut outcome = TwoWayOutcome { ok: true, ..Default::default() };

    // Additions, each side with its own unresolved-correction.
    if !add_to_a.is_empty() {
        if !a_down {
            emitter.emit(
                "two:apply:add:A:start",
                json!({ "dst": a, "feature": feature, "count": add_to_a.len() }),
            );
        }
        let res = run_add_cycle(
            ctx,
            a_ops.as_ref(),
            a,
            feature,
            &add_to_a,
            &pair,
            a_down,
            &guard_a,
            use_phantoms,
            &mut a_eff,
            health,
            "two:apply:add",
        )
        .await;
        outcome.adds_to_a = res.effective;
        outcome.unresolved_to_a = res.unresolved_new;
        outcome.errors += res.errored as usize;
        if !a_down {
            emitter.emit(
                "two:apply:add:A:done",
                json!({
                    "dst": a,
                    "feature": feature,
                    "count": res.effective,
                    "added": res.effective,
                    "unresolved": res.unresolved_new,
                }),
            );
        }
    }
    if !add_to_b.is_empty() {
        if !b_down {
            emitter.emit(
                "two:apply:add:B:start",
                json!({ "dst": b, "feature": feature, "count": add_to_b.len() }),
            );
        }
        let res = run_add_cycle(
            ctx,
            b_ops.as_ref(),
            b,
            feature,
            &add_to_b,
            &pair,
            b_down,
            &guard_b,
            use_phantoms,
            &mut b_eff,
            health,
            "two:apply:add",
        )
        .await;
        outcome.adds_to_b = res.effective;
        outcome.unresolved_to_b = res.unresolved_new;
        outcome.errors += res.errored as usize;
        if !b_down {
            emitter.emit(
                "two:apply:add:B:done",
                json!({
                    "dst": b,
                    "feature": feature,
                    "count": res.effective,
                    "added": res.effective,
                    "unresolved": res.unresolved_new,
                }),
            );
        }
    }

    // Removals run after adds and observe the post-add effective
    // baselines.
    if !rem_from_a.is_empty() {
        if !a_down {
            emitter.emit(
                "two:apply:remove:A:start",
                json!({ "dst": a, "feature": feature, "count": rem_from_a.len() }),
            );
        }
        let res = run_remove_cycle(
            ctx,
            a_ops.as_ref(),
            a,
            feature,
            &rem_from_a,
            &pair,
            a_down,
            &mut a_eff,
            health,
            true,
        )
        .await;
        outcome.rem_from_a = res.removed;
        outcome.errors += res.errored as usize;
        if !a_down {
            emitter.emit(
                "two:apply:remove:A:done",
                json!({ "dst": a, "feature": feature, "count": res.removed, "removed": res.removed }),
            );
        }
    }
    if !rem_from_b.is_empty() {
        if !b_down {
            emitter.emit(
                "two:apply:remove:B:start",
                json!({ "dst": b, "feature": feature, "count": rem_from_b.len() }),
            );
        }
        let res = run_remove_cycle(
            ctx,
            b_ops.as_ref(),
            b,
            feature,
            &rem_from_b,
            &pair,
            b_down,
            &mut b_eff,
            health,
            true,
        )
        .await;
        outcome.rem_from_b = res.removed;
        outcome.errors += res.errored as usize;
        if !b_down {
            emitter.emit(
                "two:apply:remove:B:done",
                json!({ "dst": b, "feature": feature, "count": res.removed, "removed": res.removed }),
            );
        }
    }

    // Cascade bookkeeping for everything removed this cycle.
    let removed_keys: Vec<String> = rem_from_a
        .iter()
        .chain(rem_from_b.iter())
        .map(canonical_key)
        .collect();
    if !removed_keys.is_empty() {
        cascade_removals(&ctx.store, &emitter, feature.as_str(), removed_keys);
    }

    // Persist both sides.
    let mut state = ctx.store.load_state();
    state.set_baseline(a, feature, &a_eff);
    state.set_baseline(b, feature, &b_eff);
    state.set_checkpoint(a, feature, now_cp_a);
    state.set_checkpoint(b, feature, now_cp_b);
    state.last_sync_epoch = Some(now_epoch());
    ctx.store.save_state(&state);

    emitter.emit(
        "two:done",
        json!({
            "a": a,
            "b": b,
            "feature": feature,
            "adds_to_A": outcome.adds_to_a,
            "adds_to_B": outcome.adds_to_b,
            "rem_from_A": outcome.rem_from_a,
            "rem_from_B": outcome.rem_from_b,
        }),
    );

    outcome.unresolved = outcome.unresolved_to_a + outcome.unresolved_to_b;
    outcome
}
