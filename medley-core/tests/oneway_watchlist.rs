//! End-to-end one-way scenarios: first-cycle add, baselined removal,
//! mass-delete guard, suspect shrink, and strict pessimistic counting.

mod common;

use std::sync::Arc;

use medley_config::{SyncFeature, SyncMode};
use medley_contracts::MediaAdapter;
use medley_core::{Orchestrator, RunOptions, StateStore};
use medley_model::canonical_key;

use common::{FakeAdapter, base_config, capture_events, events_named, movie};

fn orchestrator(
    src: &Arc<FakeAdapter>,
    dst: &Arc<FakeAdapter>,
    cfg: medley_config::Config,
    base: &std::path::Path,
) -> Orchestrator {
    let adapters: Vec<Arc<dyn MediaAdapter>> = vec![src.clone(), dst.clone()];
    Orchestrator::new(cfg, adapters, base)
}

#[tokio::test]
async fn add_then_observed_removal_across_runs() {
    common::init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let src = FakeAdapter::new("SRC", &[movie("tt01", "A", 2000), movie("tt03", "C", 2002)]);
    let dst = FakeAdapter::new("DST", &[movie("tt01", "A", 2000), movie("tt02", "B", 2001)]);
    let cfg = base_config("SRC", "DST", SyncMode::OneWay);
    let mut orch = orchestrator(&src, &dst, cfg, dir.path());

    // Run 1: DST receives the missing item; nothing is removed because
    // there is no destination baseline to judge removals against yet.
    let summary = orch.run(RunOptions::new()).await;
    assert_eq!(summary.added, 1);
    assert_eq!(summary.removed, 0);
    {
        let adds = dst.add_calls.lock().unwrap();
        assert_eq!(adds.len(), 1);
        assert_eq!(FakeAdapter::imdb_of(&adds[0]), vec!["tt03"]);
        assert!(dst.remove_calls.lock().unwrap().is_empty());
    }

    // Run 2: the stray item is baselined now and still absent upstream.
    let summary = orch.run(RunOptions::new()).await;
    assert_eq!(summary.removed, 1);
    {
        let removes = dst.remove_calls.lock().unwrap();
        assert_eq!(removes.len(), 1);
        assert_eq!(FakeAdapter::imdb_of(&removes[0]), vec!["tt02"]);
    }

    // The confirmed removal is tombstoned globally and pair-scoped.
    let tombs = StateStore::new(dir.path()).load_tombstones();
    assert!(tombs.keys.contains_key("watchlist|imdb:tt02"));
    assert!(tombs.keys.contains_key("watchlist:DST-SRC|imdb:tt02"));
}

#[tokio::test]
async fn tombstone_blocks_readding_removed_item() {
    let dir = tempfile::tempdir().unwrap();
    let src = FakeAdapter::new("SRC", &[movie("tt01", "A", 2000), movie("tt02", "B", 2001)]);
    let dst = FakeAdapter::new("DST", &[movie("tt01", "A", 2000), movie("tt02", "B", 2001)]);
    let cfg = base_config("SRC", "DST", SyncMode::OneWay);
    let mut orch = orchestrator(&src, &dst, cfg, dir.path());

    orch.run(RunOptions::new()).await; // baseline both
    src.remove_item("imdb:tt02");
    let summary = orch.run(RunOptions::new()).await;
    assert_eq!(summary.removed, 1);

    // The source regains the item, but the tombstone suppresses the
    // re-add within its TTL.
    let item = movie("tt02", "B", 2001);
    src.index.lock().unwrap().insert(canonical_key(&item), item);
    let summary = orch.run(RunOptions::new()).await;
    assert_eq!(summary.added, 0);
    assert_eq!(dst.add_calls.lock().unwrap().len(), 0);
}

#[tokio::test]
async fn dry_run_touches_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let src = FakeAdapter::new("SRC", &[movie("tt01", "A", 2000), movie("tt03", "C", 2002)]);
    let dst = FakeAdapter::new("DST", &[movie("tt01", "A", 2000)]);
    let cfg = base_config("SRC", "DST", SyncMode::OneWay);
    let mut orch = orchestrator(&src, &dst, cfg, dir.path());

    orch.run(RunOptions::new().dry_run(true)).await;

    let adds = dst.add_calls.lock().unwrap();
    assert_eq!(adds.len(), 1);
    assert!(!dst.index.lock().unwrap().contains_key("imdb:tt03"));
}

#[tokio::test]
async fn mass_delete_guard_drops_removals() {
    let dir = tempfile::tempdir().unwrap();
    let keep: Vec<_> = (0..70).map(|i| movie(&format!("tt1{i:03}"), &format!("M{i}"), 2000)).collect();
    let extra: Vec<_> = (0..30).map(|i| movie(&format!("tt2{i:03}"), &format!("X{i}"), 2001)).collect();
    let mut dst_items = keep.clone();
    dst_items.extend(extra.clone());

    let src = FakeAdapter::new("SRC", &keep);
    let dst = FakeAdapter::new("DST", &dst_items);

    // Seed baselines so every proposed removal is a known item.
    let store = StateStore::new(dir.path());
    let mut state = store.load_state();
    let dst_index = dst_items
        .iter()
        .map(|it| (canonical_key(it), it.clone()))
        .collect();
    state.set_baseline("DST", SyncFeature::Watchlist, &dst_index);
    store.save_state(&state);

    let mut cfg = base_config("SRC", "DST", SyncMode::OneWay);
    cfg.sync.allow_mass_delete = false;
    let mut orch = orchestrator(&src, &dst, cfg, dir.path());

    let (progress, lines) = capture_events();
    let summary = orch.run(RunOptions::new().progress(progress)).await;

    assert_eq!(summary.removed, 0);
    assert!(dst.remove_calls.lock().unwrap().is_empty());

    let blocked = events_named(&lines, "mass_delete:blocked");
    assert_eq!(blocked.len(), 1);
    assert_eq!(blocked[0]["attempted"], 30);
    assert_eq!(blocked[0]["baseline"], 100);
    assert_eq!(blocked[0]["threshold"], 10);
}

#[tokio::test]
async fn suspect_shrink_reuses_previous_baseline() {
    let dir = tempfile::tempdir().unwrap();
    let all: Vec<_> = (0..200).map(|i| movie(&format!("tt{i:05}"), &format!("M{i}"), 1990)).collect();
    let few = all[..5].to_vec();

    // Source snapshot collapsed to 5 items; its checkpoint never moved.
    let src = FakeAdapter::new("SRC", &few);
    src.set_watchlist_checkpoint("2024-01-01T00:00:00Z");
    let dst = FakeAdapter::new("DST", &all);

    let store = StateStore::new(dir.path());
    let mut state = store.load_state();
    let full_index = all.iter().map(|it| (canonical_key(it), it.clone())).collect();
    state.set_baseline("SRC", SyncFeature::Watchlist, &full_index);
    state.set_baseline("DST", SyncFeature::Watchlist, &full_index);
    state.set_checkpoint("SRC", SyncFeature::Watchlist, Some("2024-01-01T00:00:00Z".into()));
    store.save_state(&state);

    let mut cfg = base_config("SRC", "DST", SyncMode::OneWay);
    cfg.sync.drop_guard = true;
    let mut orch = orchestrator(&src, &dst, cfg, dir.path());

    let (progress, lines) = capture_events();
    let summary = orch.run(RunOptions::new().progress(progress)).await;

    // The previous baseline stands in for the bad snapshot: no removals.
    assert_eq!(summary.removed, 0);
    assert!(dst.remove_calls.lock().unwrap().is_empty());

    let suspect = events_named(&lines, "snapshot:suspect");
    assert_eq!(suspect.len(), 1);
    assert_eq!(suspect[0]["provider"], "SRC");
    assert_eq!(suspect[0]["reason"], "suspect:no-progress+shrunk");
    assert_eq!(suspect[0]["prev_count"], 200);
    assert_eq!(suspect[0]["cur_count"], 5);
}

#[tokio::test]
async fn strict_pessimistic_counting_voids_the_batch() {
    let dir = tempfile::tempdir().unwrap();
    let src = FakeAdapter::new(
        "SRC",
        &[movie("tt01", "A", 2000), movie("tt02", "B", 2001), movie("tt03", "C", 2002)],
    );
    let dst = FakeAdapter::new("DST", &[]);
    // The provider claims all three landed but flags one unresolved.
    *dst.unresolved_on_next_add.lock().unwrap() = vec![movie("tt02", "B", 2001)];

    let cfg = base_config("SRC", "DST", SyncMode::OneWay);
    let mut orch = orchestrator(&src, &dst, cfg, dir.path());

    let (progress, lines) = capture_events();
    let summary = orch.run(RunOptions::new().progress(progress)).await;

    // Without verify-after-write a fresh unresolved key voids the count.
    assert_eq!(summary.added, 0);
    assert_eq!(summary.unresolved, 1);

    let corrected: Vec<_> = events_named(&lines, "debug")
        .into_iter()
        .filter(|v| v["msg"] == "apply:add:corrected")
        .collect();
    assert_eq!(corrected.len(), 1);
    assert_eq!(corrected[0]["provider_count"], 3);
    assert_eq!(corrected[0]["effective"], 0);
    assert_eq!(corrected[0]["newly_unresolved"], 1);

    // The failed key starts a flap counter; the others reset cleanly.
    let state_dir = StateStore::new(dir.path()).cache_dir();
    let flap: serde_json::Value = serde_json::from_str(
        &std::fs::read_to_string(state_dir.join("dst_watchlist.flap.json")).unwrap(),
    )
    .unwrap();
    assert_eq!(flap["imdb:tt02"]["consecutive"], 1);
    assert_eq!(flap["imdb:tt01"]["consecutive"], 0);
}

#[tokio::test]
async fn phantom_guard_suppresses_immediate_readds() {
    let dir = tempfile::tempdir().unwrap();
    let src = FakeAdapter::new("SRC", &[movie("tt01", "A", 2000)]);
    let dst = FakeAdapter::new("DST", &[]);
    let cfg = base_config("SRC", "DST", SyncMode::OneWay);
    let mut orch = orchestrator(&src, &dst, cfg, dir.path());

    let summary = orch.run(RunOptions::new()).await;
    assert_eq!(summary.added, 1);

    // The destination loses the item without reporting a failure; the
    // phantom guard refuses to re-add it right away.
    dst.remove_item("imdb:tt01");
    let summary = orch.run(RunOptions::new()).await;
    assert_eq!(summary.added, 0);
    assert_eq!(dst.add_calls.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn wall_derives_from_watchlist_baselines() {
    let dir = tempfile::tempdir().unwrap();
    let src = FakeAdapter::new("SRC", &[movie("tt01", "A", 2000), movie("tt03", "C", 2002)]);
    let dst = FakeAdapter::new("DST", &[movie("tt01", "A", 2000)]);
    let cfg = base_config("SRC", "DST", SyncMode::OneWay);
    let mut orch = orchestrator(&src, &dst, cfg, dir.path());

    orch.run(RunOptions::new()).await;

    let state = StateStore::new(dir.path()).load_state();
    let mut wall_keys: Vec<String> = state.wall.iter().map(canonical_key).collect();
    wall_keys.sort();
    // Deduplicated union across both providers' baselines.
    assert_eq!(wall_keys, vec!["imdb:tt01", "imdb:tt03"]);
}
