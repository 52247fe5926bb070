use std::collections::BTreeSet;
use std::sync::Arc;

use serde_json::{Value, json};

use medley_config::{SyncFeature, SyncMode};
use medley_contracts::{EventSink, ProviderHealth};

use crate::context::SyncContext;
use crate::engine::HealthMap;
use crate::engine::metrics::{ApiMetrics, persist_api_totals};
use crate::engine::oneway::run_one_way_feature;
use crate::engine::twoway::run_two_way_feature;
use crate::state::tombstones::{cascade_removals, prune as prune_tombstones};
use crate::state::{LastSyncDocument, RunTotals, now_epoch};
use crate::telemetry::maybe_emit_rate_warnings;

/// Aggregate result of one full synchronization cycle.
#[derive(Debug, Clone, Copy, Default)]
pub struct RunSummary {
    pub ok: bool,
    pub added: usize,
    pub removed: usize,
    pub unresolved: usize,
    pub pairs: usize,
}

/// Ask every provider referenced by an enabled pair for health, once.
async fn collect_health_for_run(ctx: &SyncContext) -> HealthMap {
    let emitter = &ctx.emitter;
    let mut needed: BTreeSet<String> = BTreeSet::new();
    for pair in ctx.config.enabled_pairs() {
        let src = pair.source_upper();
        let dst = pair.target_upper();
        if !src.is_empty() {
            needed.insert(src);
        }
        if !dst.is_empty() {
            needed.insert(dst);
        }
    }

    let mut health_map = HealthMap::new();
    for name in needed {
        let Some(adapter) = ctx.providers.get(&name) else {
            continue;
        };
        let health = match adapter
            .health(&ctx.config, Some(emitter as &dyn EventSink))
            .await
        {
            Ok(h) => h,
            Err(err) => ProviderHealth::down(format!("health exception: {err}")),
        };

        emitter.emit(
            "health",
            json!({
                "provider": name,
                "status": health.status,
                "ok": health.ok,
                "latency_ms": health.latency_ms,
                "details": health.details,
                "features": health.features,
                "api": health.api,
            }),
        );

        // Health responses carry per-endpoint statuses; surface them as
        // hits so the run's API totals are never empty.
        for (endpoint, probe) in &health.api.endpoints {
            if let Some(status) = probe.status {
                emitter.emit(
                    "api:hit",
                    json!({
                        "provider": name,
                        "endpoint": format!("health:{endpoint}"),
                        "status": status,
                    }),
                );
            }
        }

        health_map.insert(name, health);
    }
    health_map
}

/// Run every enabled pair's enabled features and aggregate the totals.
pub async fn run_pairs(ctx: &SyncContext) -> RunSummary {
    let emitter = ctx.emitter.clone();
    let sync_cfg = &ctx.config.sync;
    let started_at = now_epoch();

    // Count api:* breadcrumbs for the whole run.
    let metrics = Arc::new(ApiMetrics::default());
    emitter.install_tap(metrics.clone());

    let ttl_days = sync_cfg.tombstone_ttl_days.max(1);
    prune_tombstones(&ctx.store, &emitter, ttl_days * 86_400);

    let health_map = collect_health_for_run(ctx).await;

    emitter.emit("run:start", json!({ "dry_run": ctx.dry_run_effective() }));

    let mut added_total = 0usize;
    let mut removed_total = 0usize;
    let mut unresolved_total = 0usize;
    let mut features_ran: BTreeSet<SyncFeature> = BTreeSet::new();

    let pairs: Vec<_> = ctx.config.enabled_pairs().cloned().collect();
    for (i, pair) in pairs.iter().enumerate() {
        let src = pair.source_upper();
        let dst = pair.target_upper();

        let mut features = pair.feature_list();
        if let Some(only) = ctx.only_feature {
            features.retain(|f| *f == only);
        }
        if pair.uses_default_features() {
            emitter.info(&format!(
                "No per-feature map set for {src}→{dst}; running defaults: {features:?}"
            ));
        }

        emitter.emit(
            "run:pair",
            json!({
                "i": i + 1,
                "n": pairs.len(),
                "src": src,
                "dst": dst,
                "mode": pair.mode,
                "features": features,
            }),
        );

        let (Some(src_ops), Some(dst_ops)) = (ctx.providers.get(&src), ctx.providers.get(&dst))
        else {
            emitter.info(&format!("[!] Missing provider ops for {src}→{dst}"));
            continue;
        };

        let src_health = health_map.get(&src).cloned().unwrap_or_default();
        let dst_health = health_map.get(&dst).cloned().unwrap_or_default();
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
            continue;
        }

        for feature in features {
            let toggle = pair.toggle_for(feature);
            if toggle.map(|t| !t.is_enabled()).unwrap_or(false) {
                continue;
            }

            let src_supported =
                src_ops.capabilities().supports(feature) && src_health.feature_ok(feature);
            let dst_supported =
                dst_ops.capabilities().supports(feature) && dst_health.feature_ok(feature);
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
                continue;
            }

            features_ran.insert(feature);

            match pair.mode {
                SyncMode::TwoWay => {
                    let res =
                        run_two_way_feature(ctx, &src, &dst, feature, toggle, &health_map).await;
                    added_total += res.adds_to_a + res.adds_to_b;
                    removed_total += res.rem_from_a + res.rem_from_b;
                    unresolved_total += res.unresolved;
                }
                SyncMode::OneWay => {
                    let res =
                        run_one_way_feature(ctx, &src, &dst, feature, toggle, &health_map).await;
                    added_total += res.added;
                    removed_total += res.removed;
                    unresolved_total += res.unresolved;
                }
            }
        }
    }

    // Watchlist-only cleanups, gated on the feature actually running.
    if features_ran.contains(&SyncFeature::Watchlist) {
        cascade_removals(&ctx.store, &emitter, "watchlist", Vec::new());
        ctx.store.clear_watchlist_hide();
        emitter.dbg(
            "hidefile.cleared",
            json!({ "feature": "watchlist", "scope": "end-of-run" }),
        );
    }

    ctx.stats.record_summary(added_total, removed_total);
    maybe_emit_rate_warnings(
        ctx.stats.as_ref(),
        &emitter,
        &ctx.config.telemetry.warn_rate_remaining,
    );

    let http = ctx.stats.http_overview(24);
    if http.as_object().map(|o| !o.is_empty()).unwrap_or(false) {
        emitter.emit("http:overview", json!({ "overview": http }));
    }

    let finished_at = now_epoch();
    ctx.store.save_last_sync(&LastSyncDocument {
        started_at,
        finished_at,
        result: RunTotals {
            added: added_total,
            removed: removed_total,
            unresolved: unresolved_total,
        },
    });

    let mut state = ctx.store.load_state();
    state.last_sync_epoch = Some(finished_at);
    ctx.store.save_state(&state);

    let overview: Value = ctx.stats.overview(&state);
    emitter.emit("stats:overview", json!({ "overview": overview }));
    emitter.dbg(
        "state.persisted",
        json!({ "providers": ctx.providers.len(), "wall": state.wall.len() }),
    );

    let totals = metrics.totals();
    emitter.emit(
        "api:totals",
        json!({ "totals": serde_json::to_value(&totals).unwrap_or(Value::Null) }),
    );
    persist_api_totals(&ctx.store, &totals);

    let (scanned, pruned) = ctx.blackbox.prune();
    if pruned > 0 {
        emitter.dbg(
            "blackbox.pruned",
            json!({ "scanned": scanned, "removed": pruned }),
        );
    }

    emitter.remove_tap();
    emitter.emit(
        "run:done",
        json!({
            "added": added_total,
            "removed": removed_total,
            "unresolved": unresolved_total,
            "pairs": pairs.len(),
        }),
    );

    RunSummary {
        ok: true,
        added: added_total,
        removed: removed_total,
        unresolved: unresolved_total,
        pairs: pairs.len(),
    }
}
