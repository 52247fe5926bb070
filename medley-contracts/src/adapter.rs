use std::collections::BTreeMap;

use async_trait::async_trait;
use serde_json::Value;

use medley_config::{Config, SyncFeature};
use medley_model::MediaItem;

use crate::apply::{Activities, ApplyOutcome};
use crate::capability::Capabilities;
use crate::error::AdapterResult;
use crate::health::ProviderHealth;

/// Structured-event sink handed to adapters that want to report
/// `api:hit`-style breadcrumbs during a call.
pub trait EventSink: Send + Sync {
    fn event(&self, name: &str, payload: Value);
}

/// The contract every provider adapter implements.
///
/// Adapters own all service specifics (HTTP, auth, identifier quirks); the
/// orchestrator only sees normalized [`MediaItem`]s and the shapes below.
/// Methods take the full [`Config`] so an adapter can find its own opaque
/// section via [`Config::provider_section`].
#[cfg_attr(feature = "mocks", mockall::automock)]
#[async_trait]
pub trait MediaAdapter: Send + Sync {
    /// Upper-case identifier, e.g. `TRAKT`.
    fn name(&self) -> &str;

    /// Human-readable label.
    fn label(&self) -> String {
        self.name().to_string()
    }

    /// Which features this adapter can sync at all.
    fn features(&self) -> BTreeMap<SyncFeature, bool>;

    /// Static capability flags; see [`Capabilities`].
    fn capabilities(&self) -> Capabilities;

    /// Is the provider usable under the current configuration?
    fn is_configured(&self, cfg: &Config) -> bool;

    /// Probe provider health. `emit` lets the adapter report per-endpoint
    /// `api:hit` breadcrumbs while probing; it may be ignored.
    async fn health(
        &self,
        cfg: &Config,
        emit: Option<&dyn EventSink>,
    ) -> AdapterResult<ProviderHealth>;

    /// Per-feature progress hints used as checkpoints. Optional; adapters
    /// without activity endpoints keep the default.
    async fn activities(&self, _cfg: &Config) -> AdapterResult<Activities> {
        Ok(Activities::default())
    }

    /// Present-state (or delta, per `index_semantics`) snapshot of one
    /// feature's inventory.
    async fn build_index(&self, cfg: &Config, feature: SyncFeature)
    -> AdapterResult<Vec<MediaItem>>;

    /// Apply additions. Items the provider cannot resolve come back in
    /// [`ApplyOutcome::unresolved`]; never silently partial.
    async fn add(
        &self,
        cfg: &Config,
        items: &[MediaItem],
        feature: SyncFeature,
        dry_run: bool,
    ) -> AdapterResult<ApplyOutcome>;

    /// Apply removals, with the same unresolved discipline as `add`.
    async fn remove(
        &self,
        cfg: &Config,
        items: &[MediaItem],
        feature: SyncFeature,
        dry_run: bool,
    ) -> AdapterResult<ApplyOutcome>;
}
