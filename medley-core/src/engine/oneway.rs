use serde_json::json;

use medley_config::{FeatureGates, FeatureToggle, SyncFeature};
use medley_contracts::IndexSemantics;

use crate::context::SyncContext;
use crate::engine::blocklist::apply_blocklist;
use crate::engine::massdelete::maybe_block_mass_delete;
use crate::engine::planner::{diff, diff_ratings, ratings_filter_index};
use crate::engine::snapshots::{
    build_snapshots_for_feature, coerce_suspect_snapshot, module_checkpoint, prev_checkpoint,
};
use crate::engine::writes::{run_add_cycle, run_remove_cycle};
use crate::engine::{HealthMap, health_of};
use crate::state::phantoms::PhantomGuard;
use crate::state::tombstones::{cascade_removals, pair_key};
use crate::state::{Index, now_epoch};

/// Roll-up of one one-way feature cycle.
#[derive(Debug, Clone, Copy, Default)]
pub struct OneWayOutcome {
    pub ok: bool,
    pub added: usize,
    pub removed: usize,
    pub unresolved: usize,
}

impl OneWayOutcome {
    fn skipped(ok: bool) -> OneWayOutcome {
        OneWayOutcome { ok, ..Default::default() }
    }
}

/// One-way sync driver (src → dst) for a single feature.
///
/// Present vs delta semantics are respected per provider; removals only
/// ever touch the destination, and tombstones are written from confirmed
/// removals alone.
pub async fn run_one_way_feature(
    ctx: &SyncContext,
    src: &str,
    dst: &str,
    feature: SyncFeature,
    toggle: Option<&FeatureToggle>,
    health: &HealthMap,
) -> OneWayOutcome {
    let emitter = ctx.emitter.clone();
    let sync_cfg = &ctx.config.sync;
    let runtime = &ctx.config.runtime;

    let src = src.trim().to_ascii_uppercase();
    let dst = dst.trim().to_ascii_uppercase();

    emitter.emit(
        "feature:start",
        json!({ "src": src, "dst": dst, "feature": feature }),
    );
    let done = || {
        emitter.emit(
            "feature:done",
            json!({ "src": src, "dst": dst, "feature": feature }),
        );
    };

    let (Some(src_ops), Some(dst_ops)) = (ctx.providers.get(&src), ctx.providers.get(&dst))
    else {
        emitter.info(&format!("[!] Missing provider ops for {src}→{dst}"));
        done();
        return OneWayOutcome::skipped(false);
    };

    let gates = toggle
        .map(|t| t.resolve_gates(sync_cfg))
        .unwrap_or_else(|| FeatureGates::from_sync(sync_cfg));

    let src_health = health_of(health, &src);
    let dst_health = health_of(health, &dst);
    if src_health.is_auth_failed() || dst_health.is_auth_failed() {
        emitter.emit(
            "pair:skip",
            json!({
                "src": src,
                "dst": dst,
                "reason": "auth_failed",
                "src_status": src_health.status,
                "dst_status": dst_health.status,
            }),
        );
        done();
        return OneWayOutcome::skipped(false);
    }

    let src_caps = src_ops.capabilities();
    let dst_caps = dst_ops.capabilities();
    let src_supported = src_caps.supports(feature) && src_health.feature_ok(feature);
    let dst_supported = dst_caps.supports(feature) && dst_health.feature_ok(feature);
    if !src_supported || !dst_supported {
        emitter.emit(
            "feature:unsupported",
            json!({
                "src": src,
                "dst": dst,
                "feature": feature,
                "src_supported": src_supported,
                "dst_supported": dst_supported,
            }),
        );
        done();
        return OneWayOutcome::skipped(true);
    }

    // A down source means no trustworthy plan at all; skip writes outright
    // rather than risk a delete storm.
    if src_health.is_down() {
        emitter.emit(
            "writes:skipped",
            json!({ "src": src, "dst": dst, "feature": feature, "reason": "source_down" }),
        );
        done();
        return OneWayOutcome::skipped(true);
    }
    let dst_down = dst_health.is_down();

    // Fresh snapshots + previous baselines.
    let snaps = build_snapshots_for_feature(
        feature,
        &ctx.config,
        &ctx.providers,
        &ctx.snapshots,
        ctx.snapshot_ttl(),
        &emitter,
    )
    .await;
    let src_cur = snaps.get(&src).cloned().unwrap_or_default();
    let dst_cur = snaps.get(&dst).cloned().unwrap_or_default();

    let prev_state = ctx.store.load_state();
    let prev_src = prev_state.baseline_items(&src, feature);
    let prev_dst = prev_state.baseline_items(&dst, feature);

    let now_cp_src = module_checkpoint(src_ops.as_ref(), &ctx.config, feature).await;
    let now_cp_dst = module_checkpoint(dst_ops.as_ref(), &ctx.config, feature).await;

    let (eff_src, eff_dst) = if sync_cfg.drop_guard {
        let src_verdict = coerce_suspect_snapshot(
            &src,
            src_caps.index_semantics,
            &prev_src,
            &src_cur,
            feature,
            runtime.suspect_min_prev,
            runtime.suspect_shrink_ratio,
            runtime.suspect_debug,
            &emitter,
            prev_checkpoint(&prev_state, &src, feature).as_deref(),
            now_cp_src.as_deref(),
        );
        if src_verdict.suspect {
            emitter.dbg(
                "snapshot.guard",
                json!({ "provider": src, "feature": feature, "reason": src_verdict.reason }),
            );
        }
        let dst_verdict = coerce_suspect_snapshot(
            &dst,
            dst_caps.index_semantics,
            &prev_dst,
            &dst_cur,
            feature,
            runtime.suspect_min_prev,
            runtime.suspect_shrink_ratio,
            runtime.suspect_debug,
            &emitter,
            prev_checkpoint(&prev_state, &dst, feature).as_deref(),
            now_cp_dst.as_deref(),
        );
        if dst_verdict.suspect {
            emitter.dbg(
                "snapshot.guard",
                json!({ "provider": dst, "feature": feature, "reason": dst_verdict.reason }),
            );
        }
        (src_verdict.index, dst_verdict.index)
    } else {
        (src_cur.clone(), dst_cur.clone())
    };

    // Delta providers only ship changes; union in the previous baseline.
    let mut src_idx: Index = if src_caps.index_semantics == IndexSemantics::Delta {
        let mut merged = prev_src.clone();
        merged.extend(src_cur);
        merged
    } else {
        eff_src
    };
    let mut dst_full: Index = if dst_caps.index_semantics == IndexSemantics::Delta {
        let mut merged = prev_dst.clone();
        merged.extend(dst_cur);
        merged
    } else {
        eff_dst
    };

    let options = toggle.and_then(|t| t.options());
    let (mut adds, mut removes) = if feature == SyncFeature::Ratings {
        src_idx = ratings_filter_index(&src_idx, options);
        dst_full = ratings_filter_index(&dst_full, options);
        diff_ratings(&src_idx, &dst_full, false)
    } else {
        diff(&src_idx, &dst_full)
    };

    if !gates.allow_adds {
        adds.clear();
    }
    if !gates.allow_removes {
        removes.clear();
    }

    // Only remove what an earlier cycle reconciled: a destination item
    // with no baseline entry has never been compared before, and deleting
    // it on first sight would punish fresh deployments.
    removes.retain(|it| prev_dst.contains_key(&medley_model::canonical_key(it)));

    removes = maybe_block_mass_delete(
        removes,
        dst_full.len(),
        sync_cfg.allow_mass_delete,
        runtime.suspect_shrink_ratio,
        &emitter,
        &dst,
        feature.as_str(),
    );

    let pair = pair_key(&src, &dst);
    adds = apply_blocklist(
        &ctx.store,
        &ctx.unresolved,
        &ctx.blackbox,
        adds,
        &dst,
        feature,
        Some(&pair),
        &emitter,
    );

    emitter.emit(
        "one:plan",
        json!({
            "src": src,
            "dst": dst,
            "feature": feature,
            "adds": adds.len(),
            "removes": removes.len(),
            "src_count": src_idx.len(),
            "dst_count": dst_full.len(),
        }),
    );

    let bb_cfg = &sync_cfg.blackbox;
    let use_phantoms = bb_cfg.enabled && bb_cfg.block_adds;
    let guard = PhantomGuard::new(
        ctx.store.cache_dir(),
        &src,
        &dst,
        feature,
        Some(bb_cfg.cooldown_days),
        use_phantoms,
        ctx.pair_scope(),
    );
    if use_phantoms && !adds.is_empty() {
        let (kept, _blocked) =
            guard.filter_adds(adds, &ctx.blackbox, &dst, feature, &pair, &emitter);
        adds = kept;
    }

    let add_outcome = run_add_cycle(
        ctx,
        dst_ops.as_ref(),
        &dst,
        feature,
        &adds,
        &pair,
        dst_down,
        &guard,
        use_phantoms,
        &mut dst_full,
        health,
        "apply:add",
    )
    .await;

    let removed = run_remove_cycle(
        ctx,
        dst_ops.as_ref(),
        &dst,
        feature,
        &removes,
        &pair,
        dst_down,
        &mut dst_full,
        health,
        false,
    )
    .await
    .removed;

    // Persist baselines and checkpoints; a failed write only costs the
    // next run incrementality.
    let mut state = ctx.store.load_state();
    state.set_baseline(&src, feature, &src_idx);
    state.set_baseline(&dst, feature, &dst_full);
    state.set_checkpoint(&src, feature, now_cp_src);
    state.set_checkpoint(&dst, feature, now_cp_dst);
    state.last_sync_epoch = Some(now_epoch());
    ctx.store.save_state(&state);

    if removed > 0 {
        let removed_keys = removes
            .iter()
            .map(|it| medley_model::canonical_key(it))
            .collect::<Vec<_>>();
        cascade_removals(&ctx.store, &emitter, feature.as_str(), removed_keys);
    }

    done();
    OneWayOutcome {
        ok: true,
        added: add_outcome.effective,
        removed,
        unresolved: add_outcome.unresolved_new,
    }
}
