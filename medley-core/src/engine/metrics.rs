use std::collections::BTreeMap;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

use crate::events::EmitTap;
use crate::state::store::{ApiMetricsRecord, MetricsRecord, StateStore};
use crate::state::now_epoch;

/// Per-provider API hit buckets.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderBuckets {
    pub total: u64,
    pub by_endpoint: BTreeMap<String, u64>,
    pub by_feature: BTreeMap<String, u64>,
    pub by_method: BTreeMap<String, u64>,
    pub by_status: BTreeMap<String, u64>,
    pub latency_ms_sum: u64,
    pub latency_ms_samples: u64,
}

/// Ready-to-emit totals payload.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiTotals {
    pub total: u64,
    pub providers: BTreeMap<String, ProviderTotals>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderTotals {
    pub total: u64,
    pub by_endpoint: BTreeMap<String, u64>,
    pub by_feature: BTreeMap<String, u64>,
    pub by_method: BTreeMap<String, u64>,
    pub by_status: BTreeMap<String, u64>,
    pub latency_ms_avg: Option<u64>,
    pub latency_ms_samples: u64,
}

/// Emitter tap aggregating `api:hit` breadcrumbs into per-provider
/// buckets and merging provider-fed `api:totals` payloads.
///
/// Telemetry must never break a run, so every ingestion path is lenient
/// about missing or oddly-typed fields.
#[derive(Debug, Default)]
pub struct ApiMetrics {
    hits: Mutex<BTreeMap<String, ProviderBuckets>>,
}

impl ApiMetrics {
    fn with_entry(&self, provider: &str, f: impl FnOnce(&mut ProviderBuckets)) {
        let key = if provider.is_empty() { "UNKNOWN".to_string() } else { provider.to_ascii_uppercase() };
        let mut hits = self.hits.lock().unwrap_or_else(|e| e.into_inner());
        f(hits.entry(key).or_default());
    }

    fn on_api_hit(&self, payload: &Map<String, Value>) {
        let provider = ["provider", "dst", "src"]
            .iter()
            .find_map(|k| payload.get(*k).and_then(Value::as_str))
            .unwrap_or("UNKNOWN")
            .to_string();

        self.with_entry(&provider, |ent| {
            ent.total += 1;
            if let Some(ep) = payload.get("endpoint").and_then(Value::as_str) {
                *ent.by_endpoint.entry(ep.to_string()).or_default() += 1;
            }
            if let Some(feat) = payload.get("feature").and_then(Value::as_str) {
                *ent.by_feature.entry(feat.to_string()).or_default() += 1;
            }
            if let Some(method) = payload.get("method").and_then(Value::as_str) {
                *ent.by_method.entry(method.to_ascii_uppercase()).or_default() += 1;
            }
            if let Some(code) = payload.get("status").and_then(Value::as_i64) {
                *ent.by_status.entry(code.to_string()).or_default() += 1;
                *ent.by_status.entry(format!("{}xx", code / 100)).or_default() += 1;
            }
            let ms = payload
                .get("ms")
                .or_else(|| payload.get("latency_ms"))
                .and_then(Value::as_u64);
            if let Some(ms) = ms {
                ent.latency_ms_sum += ms;
                ent.latency_ms_samples += 1;
            }
        });
    }

    /// Merge pre-aggregated totals a provider emitted itself.
    fn on_api_totals(&self, totals: &Value) {
        let Some(providers) = totals.get("providers").and_then(Value::as_object) else {
            return;
        };
        for (name, data) in providers {
            let Some(data) = data.as_object() else { continue };
            self.with_entry(name, |ent| {
                ent.total += data.get("total").and_then(Value::as_u64).unwrap_or(0);
                for (bucket, target) in [
                    ("by_endpoint", &mut ent.by_endpoint),
                    ("by_feature", &mut ent.by_feature),
                    ("by_method", &mut ent.by_method),
                    ("by_status", &mut ent.by_status),
                ] {
                    if let Some(sub) = data.get(bucket).and_then(Value::as_object) {
                        for (k, v) in sub {
                            *target.entry(k.clone()).or_default() +=
                                v.as_u64().unwrap_or(0);
                        }
                    }
                }
                // Latency merges only when the source ships sum + samples.
                if let (Some(sum), Some(samples)) = (
                    data.get("latency_ms_sum").and_then(Value::as_u64),
                    data.get("latency_ms_samples").and_then(Value::as_u64),
                ) {
                    ent.latency_ms_sum += sum;
                    ent.latency_ms_samples += samples;
                }
            });
        }
    }

    /// Build the compact totals payload.
    pub fn totals(&self) -> ApiTotals {
        let hits = self.hits.lock().unwrap_or_else(|e| e.into_inner());
        let mut out = ApiTotals::default();
        for (provider, ent) in hits.iter() {
            let avg = if ent.latency_ms_samples > 0 {
                Some(ent.latency_ms_sum / ent.latency_ms_samples)
            } else {
                None
            };
            out.providers.insert(
                provider.clone(),
                ProviderTotals {
                    total: ent.total,
                    by_endpoint: ent.by_endpoint.clone(),
                    by_feature: ent.by_feature.clone(),
                    by_method: ent.by_method.clone(),
                    by_status: ent.by_status.clone(),
                    latency_ms_avg: avg,
                    latency_ms_samples: ent.latency_ms_samples,
                },
            );
            out.total += ent.total;
        }
        out
    }
}

impl EmitTap for ApiMetrics {
    fn observe(&self, event: &str, payload: &Map<String, Value>) {
        match event {
            "api:hit" => self.on_api_hit(payload),
            "api:totals" => {
                if let Some(totals) = payload.get("totals") {
                    self.on_api_totals(totals);
                }
            }
            _ => {}
        }
    }
}

/// Stamp the totals into `state.json` under `metrics.api.last`.
pub fn persist_api_totals(store: &StateStore, totals: &ApiTotals) {
    let mut state = store.load_state();
    let mut last = json!({ "ts": now_epoch() });
    if let (Value::Object(out), Ok(Value::Object(t))) =
        (&mut last, serde_json::to_value(totals))
    {
        out.extend(t);
    }
    state.metrics = Some(MetricsRecord { api: ApiMetricsRecord { last: Some(last) } });
    store.save_state(&state);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload(v: Value) -> Map<String, Value> {
        match v {
            Value::Object(m) => m,
            _ => unreachable!(),
        }
    }

    #[test]
    fn counts_hits_by_bucket() {
        let metrics = ApiMetrics::default();
        metrics.observe(
            "api:hit",
            &payload(json!({
                "provider": "trakt",
                "endpoint": "/sync/watchlist",
                "feature": "watchlist",
                "method": "get",
                "status": 200,
                "ms": 120,
            })),
        );
        metrics.observe(
            "api:hit",
            &payload(json!({ "dst": "TRAKT", "endpoint": "/sync/watchlist", "status": 429 })),
        );

        let totals = metrics.totals();
        assert_eq!(totals.total, 2);
        let trakt = &totals.providers["TRAKT"];
        assert_eq!(trakt.by_endpoint["/sync/watchlist"], 2);
        assert_eq!(trakt.by_method["GET"], 1);
        assert_eq!(trakt.by_status["200"], 1);
        assert_eq!(trakt.by_status["2xx"], 1);
        assert_eq!(trakt.by_status["4xx"], 1);
        assert_eq!(trakt.latency_ms_avg, Some(120));
    }

    #[test]
    fn merges_provider_fed_totals() {
        let metrics = ApiMetrics::default();
        metrics.observe(
            "api:totals",
            &payload(json!({
                "totals": {
                    "total": 7,
                    "providers": {
                        "SIMKL": {
                            "total": 7,
                            "by_endpoint": {"/ratings": 7},
                            "latency_ms_sum": 700,
                            "latency_ms_samples": 7,
                        }
                    }
                }
            })),
        );
        let totals = metrics.totals();
        assert_eq!(totals.total, 7);
        assert_eq!(totals.providers["SIMKL"].by_endpoint["/ratings"], 7);
        assert_eq!(totals.providers["SIMKL"].latency_ms_avg, Some(100));
    }

    #[test]
    fn persists_into_state() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::new(dir.path());
        let metrics = ApiMetrics::default();
        metrics.observe("api:hit", &payload(json!({ "provider": "PLEX" })));
        persist_api_totals(&store, &metrics.totals());

        let state = store.load_state();
        let last = state.metrics.unwrap().api.last.unwrap();
        assert_eq!(last["total"], 1);
        assert!(last["ts"].as_i64().unwrap() > 0);
    }
}
