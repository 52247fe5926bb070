use std::collections::BTreeMap;

use serde_json::{Value, json};

use crate::events::Emitter;
use crate::state::StateDocument;

/// Pluggable telemetry sink.
///
/// The engine feeds it run summaries and asks it for overview payloads;
/// deployments without a stats backend keep the no-op defaults.
pub trait Stats: Send + Sync {
    fn record_summary(&self, _added: usize, _removed: usize) {}

    /// Overview payload for the `stats:overview` event.
    fn overview(&self, _state: &StateDocument) -> Value {
        json!({})
    }

    /// HTTP traffic overview for the trailing window, for `http:overview`.
    fn http_overview(&self, _hours: u32) -> Value {
        json!({})
    }
}

/// Default sink that records nothing.
#[derive(Debug, Default)]
pub struct NoopStats;

impl Stats for NoopStats {}

/// Emit `rate:low` for every provider whose remaining budget in the stats
/// backend's overview dips to its configured threshold.
pub fn maybe_emit_rate_warnings(
    stats: &dyn Stats,
    emitter: &Emitter,
    thresholds: &BTreeMap<String, i64>,
) {
    let overview = stats.http_overview(24);
    let Some(providers) = overview.get("providers").and_then(Value::as_object) else {
        return;
    };
    for (provider, row) in providers {
        let rate = row.get("rate").cloned().unwrap_or(Value::Null);
        let Some(remaining) = rate.get("remaining").and_then(Value::as_i64) else {
            continue;
        };
        let threshold = thresholds.get(provider).copied().unwrap_or(0);
        if threshold > 0 && remaining <= threshold {
            emitter.emit(
                "rate:low",
                json!({
                    "provider": provider,
                    "remaining": remaining,
                    "reset": rate.get("reset").cloned().unwrap_or(Value::Null),
                    "threshold": threshold,
                }),
            );
        }
    }
}
