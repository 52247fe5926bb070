//! Two-way scenarios: bootstrap protection, convergence, observed
//! deletions, capability clamping and alias-aware presence.

mod common;

use std::sync::Arc;

use medley_config::SyncMode;
use medley_contracts::{Capabilities, MediaAdapter};
use medley_core::{Orchestrator, RunOptions, StateStore};
use medley_model::{IdKind, MediaItem, MediaKind};

use common::{FakeAdapter, base_config, movie};

fn orchestrator(
    a: &Arc<FakeAdapter>,
    b: &Arc<FakeAdapter>,
    cfg: medley_config::Config,
    base: &std::path::Path,
) -> Orchestrator {
    let adapters: Vec<Arc<dyn MediaAdapter>> = vec![a.clone(), b.clone()];
    Orchestrator::new(cfg, adapters, base)
}

#[tokio::test]
async fn bootstrap_adds_both_ways_and_never_removes() {
    common::init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let a = FakeAdapter::new("ALPHA", &[movie("tt01", "A", 2000)]);
    let b = FakeAdapter::new("BETA", &[movie("tt02", "B", 2001)]);
    let cfg = base_config("ALPHA", "BETA", SyncMode::TwoWay);
    let mut orch = orchestrator(&a, &b, cfg, dir.path());

    let summary = orch.run(RunOptions::new()).await;
    assert_eq!(summary.added, 2);
    assert_eq!(summary.removed, 0);
    assert!(a.remove_calls.lock().unwrap().is_empty());
    assert!(b.remove_calls.lock().unwrap().is_empty());

    let mut a_keys = a.keys();
    let mut b_keys = b.keys();
    a_keys.sort();
    b_keys.sort();
    assert_eq!(a_keys, vec!["imdb:tt01", "imdb:tt02"]);
    assert_eq!(a_keys, b_keys);
}

#[tokio::test]
async fn converged_pair_plans_nothing_on_rerun() {
    let dir = tempfile::tempdir().unwrap();
    let a = FakeAdapter::new("ALPHA", &[movie("tt01", "A", 2000)]);
    let b = FakeAdapter::new("BETA", &[movie("tt02", "B", 2001)]);
    let cfg = base_config("ALPHA", "BETA", SyncMode::TwoWay);
    let mut orch = orchestrator(&a, &b, cfg, dir.path());

    orch.run(RunOptions::new()).await;
    let add_calls_before = a.add_calls.lock().unwrap().len() + b.add_calls.lock().unwrap().len();

    let summary = orch.run(RunOptions::new()).await;
    assert_eq!(summary.added, 0);
    assert_eq!(summary.removed, 0);
    let add_calls_after = a.add_calls.lock().unwrap().len() + b.add_calls.lock().unwrap().len();
    assert_eq!(add_calls_before, add_calls_after);
}

#[tokio::test]
async fn observed_deletion_tombstones_and_propagates() {
    let dir = tempfile::tempdir().unwrap();
    let a = FakeAdapter::new("ALPHA", &[movie("tt01", "A", 2000), movie("tt02", "B", 2001)]);
    let b = FakeAdapter::new("BETA", &[movie("tt01", "A", 2000), movie("tt02", "B", 2001)]);
    let cfg = base_config("ALPHA", "BETA", SyncMode::TwoWay);
    let mut orch = orchestrator(&a, &b, cfg, dir.path());

    orch.run(RunOptions::new()).await; // baseline both sides

    // The user deletes an item on side A; the next cycle must infer the
    // deletion, tombstone it and carry it over to side B.
    a.remove_item("imdb:tt02");
    let summary = orch.run(RunOptions::new()).await;

    assert_eq!(summary.removed, 1);
    let removes = b.remove_calls.lock().unwrap();
    assert_eq!(removes.len(), 1);
    assert_eq!(FakeAdapter::imdb_of(&removes[0]), vec!["tt02"]);

    let tombs = StateStore::new(dir.path()).load_tombstones();
    assert!(tombs.keys.contains_key("watchlist|imdb:tt02"));
    assert!(tombs.keys.contains_key("watchlist:ALPHA-BETA|imdb:tt02"));
    // And the deleted item does not bounce back to side A.
    assert!(!a.keys().contains(&"imdb:tt02".to_string()));
}

#[tokio::test]
async fn observed_deletes_capability_clamps_tombstones() {
    let dir = tempfile::tempdir().unwrap();
    let a = FakeAdapter::new("ALPHA", &[movie("tt01", "A", 2000), movie("tt02", "B", 2001)]);
    let b = FakeAdapter::new("BETA", &[movie("tt01", "A", 2000), movie("tt02", "B", 2001)]);
    b.set_capabilities(Capabilities {
        observed_deletes: Some(false),
        ..Default::default()
    });
    let mut cfg = base_config("ALPHA", "BETA", SyncMode::TwoWay);
    // Keep the phantom guard out of the picture so the re-add is visible.
    cfg.sync.blackbox.enabled = false;
    let mut orch = orchestrator(&a, &b, cfg, dir.path());

    orch.run(RunOptions::new()).await;
    a.remove_item("imdb:tt02");
    let summary = orch.run(RunOptions::new()).await;

    // No tombstones may be written while a side opts out of observed
    // deletions; the asymmetry resolves as a re-add instead.
    let tombs = StateStore::new(dir.path()).load_tombstones();
    assert!(tombs.keys.is_empty());
    assert_eq!(summary.removed, 0);
    assert!(a.keys().contains(&"imdb:tt02".to_string()));
}

#[tokio::test]
async fn alias_aware_presence_prevents_spurious_adds() {
    let dir = tempfile::tempdir().unwrap();
    // The same film, known to one side by tmdb only and to the other by
    // imdb + tmdb; canonical keys differ but the alias overlaps.
    let by_tmdb = MediaItem {
        kind: MediaKind::Movie,
        title: Some("Fight Club".into()),
        year: Some(1999),
        ids: [(IdKind::Tmdb, "550".to_string())].into(),
        ..Default::default()
    };
    let by_both = MediaItem {
        kind: MediaKind::Movie,
        title: Some("Fight Club".into()),
        year: Some(1999),
        ids: [
            (IdKind::Imdb, "tt0137523".to_string()),
            (IdKind::Tmdb, "550".to_string()),
        ]
        .into(),
        ..Default::default()
    };
    let a = FakeAdapter::new("ALPHA", &[by_tmdb]);
    let b = FakeAdapter::new("BETA", &[by_both]);
    let cfg = base_config("ALPHA", "BETA", SyncMode::TwoWay);
    let mut orch = orchestrator(&a, &b, cfg, dir.path());

    let summary = orch.run(RunOptions::new()).await;
    assert_eq!(summary.added, 0);
    assert!(a.add_calls.lock().unwrap().is_empty());
    assert!(b.add_calls.lock().unwrap().is_empty());
}

#[tokio::test]
async fn one_way_then_two_way_is_quiescent() {
    let dir = tempfile::tempdir().unwrap();
    let a = FakeAdapter::new("ALPHA", &[movie("tt01", "A", 2000), movie("tt02", "B", 2001)]);
    let b = FakeAdapter::new("BETA", &[movie("tt01", "A", 2000)]);

    let cfg = base_config("ALPHA", "BETA", SyncMode::OneWay);
    let mut orch = orchestrator(&a, &b, cfg, dir.path());
    let summary = orch.run(RunOptions::new()).await;
    assert_eq!(summary.added, 1);

    // Re-running the (now converged) pair two-way plans nothing more.
    let cfg = base_config("ALPHA", "BETA", SyncMode::TwoWay);
    let mut orch = orchestrator(&a, &b, cfg, dir.path());
    let summary = orch.run(RunOptions::new()).await;
    assert_eq!(summary.added, 0);
    assert_eq!(summary.removed, 0);
}

#[tokio::test]
async fn auth_failure_skips_the_pair() {
    let dir = tempfile::tempdir().unwrap();
    let a = FakeAdapter::new("ALPHA", &[movie("tt01", "A", 2000)]);
    let b = FakeAdapter::new("BETA", &[]);
    b.set_health(medley_contracts::ProviderHealth {
        ok: false,
        status: medley_contracts::HealthStatus::AuthFailed,
        ..Default::default()
    });
    let cfg = base_config("ALPHA", "BETA", SyncMode::TwoWay);
    let mut orch = orchestrator(&a, &b, cfg, dir.path());

    let summary = orch.run(RunOptions::new()).await;
    assert_eq!(summary.added, 0);
    assert!(b.add_calls.lock().unwrap().is_empty());
}

#[tokio::test]
async fn down_provider_parks_writes_as_unresolved() {
    let dir = tempfile::tempdir().unwrap();
    let a = FakeAdapter::new("ALPHA", &[movie("tt01", "A", 2000)]);
    let b = FakeAdapter::new("BETA", &[]);
    b.set_health(medley_contracts::ProviderHealth::down("maintenance"));
    let cfg = base_config("ALPHA", "BETA", SyncMode::TwoWay);
    let mut orch = orchestrator(&a, &b, cfg, dir.path());

    let summary = orch.run(RunOptions::new()).await;

    // Nothing was written to the down side, but the planned add is
    // remembered as unresolved for later cycles.
    assert!(b.add_calls.lock().unwrap().is_empty());
    assert_eq!(summary.unresolved, 1);
    let pending = StateStore::new(dir.path())
        .cache_dir()
        .join("beta_watchlist.unresolved.pending.json");
    let doc: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(pending).unwrap()).unwrap();
    assert_eq!(doc["keys"][0], "imdb:tt01");
    assert_eq!(doc["hints"]["imdb:tt01"]["reason"], "provider_down:add");
}
