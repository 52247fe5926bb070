//! The synchronization engine: snapshot collection, planning, guards,
//! write application and the per-pair drivers that wire them together.

pub mod applier;
pub mod blocklist;
pub mod massdelete;
pub mod metrics;
pub mod oneway;
pub mod pairs;
pub mod planner;
pub mod snapshots;
pub mod twoway;
pub(crate) mod writes;

use std::collections::BTreeMap;

use serde_json::json;

use medley_contracts::ProviderHealth;

use crate::context::SyncContext;

/// Health reports collected once per run, keyed by upper-case provider.
pub type HealthMap = BTreeMap<String, ProviderHealth>;

/// A provider with no health entry counts as healthy; only an explicit
/// bad status may block work.
pub(crate) fn health_of(map: &HealthMap, name: &str) -> ProviderHealth {
    map.get(name).cloned().unwrap_or_default()
}

/// Inter-chunk pause for writes to a provider, inflated by a second when
/// its remaining rate budget is nearly gone.
pub(crate) fn pause_for(ctx: &SyncContext, provider: &str, health: &HealthMap) -> u64 {
    let base = ctx.config.runtime.apply_chunk_pause_ms;
    if let Some(remaining) = health.get(provider).and_then(|h| h.rate_remaining())
        && remaining < 10
    {
        ctx.emitter.emit(
            "rate:slow",
            json!({
                "provider": provider,
                "remaining": remaining,
                "base_ms": base,
                "extra_ms": 1000,
            }),
        );
        return base + 1000;
    }
    base
}
