use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use medley_config::SyncFeature;

/// Coarse provider health classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Ok,
    Degraded,
    AuthFailed,
    Down,
}

impl Default for HealthStatus {
    fn default() -> Self {
        HealthStatus::Ok
    }
}

impl HealthStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            HealthStatus::Ok => "ok",
            HealthStatus::Degraded => "degraded",
            HealthStatus::AuthFailed => "auth_failed",
            HealthStatus::Down => "down",
        }
    }
}

/// A provider's remaining rate budget, when it exposes one.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitWindow {
    pub limit: Option<i64>,
    pub remaining: Option<i64>,
    /// Epoch seconds at which the window resets.
    pub reset: Option<i64>,
}

/// Per-endpoint probe result carried inside a health response.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EndpointHealth {
    pub status: Option<u16>,
    pub latency_ms: Option<u64>,
}

/// API-level health details.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiHealth {
    pub rate_limit: Option<RateLimitWindow>,
    pub endpoints: BTreeMap<String, EndpointHealth>,
}

/// Health report returned by an adapter's probe.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderHealth {
    pub ok: bool,
    pub status: HealthStatus,
    /// Per-feature health; an absent entry counts as healthy.
    pub features: BTreeMap<SyncFeature, bool>,
    pub details: Option<String>,
    pub api: ApiHealth,
    pub latency_ms: Option<u64>,
}

impl Default for ProviderHealth {
    fn default() -> Self {
        ProviderHealth {
            ok: true,
            status: HealthStatus::Ok,
            features: BTreeMap::new(),
            details: None,
            api: ApiHealth::default(),
            latency_ms: None,
        }
    }
}

impl ProviderHealth {
    /// A synthesized report for a provider whose probe itself failed.
    pub fn down(details: impl Into<String>) -> ProviderHealth {
        ProviderHealth {
            ok: false,
            status: HealthStatus::Down,
            details: Some(details.into()),
            ..Default::default()
        }
    }

    pub fn is_down(&self) -> bool {
        self.status == HealthStatus::Down
    }

    pub fn is_auth_failed(&self) -> bool {
        self.status == HealthStatus::AuthFailed
    }

    /// Per-feature health gate; missing entries are healthy.
    pub fn feature_ok(&self, feature: SyncFeature) -> bool {
        self.features.get(&feature).copied().unwrap_or(true)
    }

    /// Remaining rate budget, when the provider surfaced one.
    pub fn rate_remaining(&self) -> Option<i64> {
        self.api.rate_limit.as_ref().and_then(|r| r.remaining)
    }
}
