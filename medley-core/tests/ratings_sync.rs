//! Ratings feature scenarios: upserts, unrates, and the type/date
//! prefilter, exercised through the full driver rather than the planner
//! alone.

mod common;

use std::sync::Arc;

use medley_config::SyncMode;
use medley_contracts::MediaAdapter;
use medley_core::{Orchestrator, RunOptions};
use medley_model::{MediaItem, MediaKind};

use common::{FakeAdapter, rated_movie, ratings_pair};

fn config(src: &str, dst: &str, types: Vec<String>, from_date: Option<String>) -> medley_config::Config {
    let mut cfg = medley_config::Config::default();
    cfg.pairs = vec![ratings_pair(src, dst, SyncMode::OneWay, types, from_date)];
    cfg.sync.enable_remove = true;
    cfg.sync.allow_mass_delete = true;
    cfg
}

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
async fn upserts_changed_and_missing_ratings() {
    let dir = tempfile::tempdir().unwrap();
    let src = FakeAdapter::new(
        "SRC",
        &[rated_movie("tt01", "A", 2000, 7.0), rated_movie("tt02", "B", 2001, 8.0)],
    );
    let dst = FakeAdapter::new(
        "DST",
        &[rated_movie("tt01", "A", 2000, 6.0), rated_movie("tt03", "C", 2002, 9.0)],
    );
    let mut orch = orchestrator(&src, &dst, config("SRC", "DST", Vec::new(), None), dir.path());

    let summary = orch.run(RunOptions::new()).await;

    // tt01 changed (6 → 7), tt02 is missing; both land as upserts. The
    // stray tt03 has no baseline yet, so its unrate waits a cycle.
    assert_eq!(summary.added, 2);
    assert_eq!(summary.removed, 0);
    let adds = dst.add_calls.lock().unwrap();
    let mut sent = FakeAdapter::imdb_of(&adds[0]);
    sent.sort();
    assert_eq!(sent, vec!["tt01", "tt02"]);
    assert_eq!(adds[0].iter().find(|it| it.title.as_deref() == Some("A")).unwrap().rating, Some(7.0));
    drop(adds);

    // Second cycle: tt03 is baselined and still unrated upstream.
    let summary = orch.run(RunOptions::new()).await;
    assert_eq!(summary.removed, 1);
    let removes = dst.remove_calls.lock().unwrap();
    assert_eq!(FakeAdapter::imdb_of(&removes[0]), vec!["tt03"]);
}

#[tokio::test]
async fn percent_scale_source_matches_ten_point_destination() {
    let dir = tempfile::tempdir().unwrap();
    let src = FakeAdapter::new("SRC", &[rated_movie("tt01", "A", 2000, 70.0)]);
    let dst = FakeAdapter::new("DST", &[rated_movie("tt01", "A", 2000, 7.0)]);
    let mut orch = orchestrator(&src, &dst, config("SRC", "DST", Vec::new(), None), dir.path());

    let summary = orch.run(RunOptions::new()).await;
    assert_eq!(summary.added, 0);
    assert!(dst.add_calls.lock().unwrap().is_empty());
}

#[tokio::test]
async fn type_and_date_filters_narrow_the_plan() {
    let dir = tempfile::tempdir().unwrap();
    let mut show = rated_movie("tt02", "B", 2001, 8.0);
    show.kind = MediaKind::Show;
    let mut stale = rated_movie("tt03", "C", 2002, 6.0);
    stale.rated_at = Some("2023-06-01T00:00:00Z".into());
    let mut fresh = rated_movie("tt01", "A", 2000, 7.0);
    fresh.rated_at = Some("2024-06-01T00:00:00Z".into());

    let src = FakeAdapter::new("SRC", &[show, stale, fresh]);
    let dst = FakeAdapter::new("DST", &[]);
    let cfg = config(
        "SRC",
        "DST",
        vec!["movies".into()],
        Some("2024-01-01".into()),
    );
    let mut orch = orchestrator(&src, &dst, cfg, dir.path());

    let summary = orch.run(RunOptions::new()).await;
    assert_eq!(summary.added, 1);
    let adds = dst.add_calls.lock().unwrap();
    assert_eq!(FakeAdapter::imdb_of(&adds[0]), vec!["tt01"]);
}

#[tokio::test]
async fn unrated_items_never_produce_upserts() {
    let dir = tempfile::tempdir().unwrap();
    let unrated: Vec<MediaItem> = vec![common::movie("tt01", "A", 2000)];
    let src = FakeAdapter::new("SRC", &unrated);
    let dst = FakeAdapter::new("DST", &[]);
    let mut orch = orchestrator(&src, &dst, config("SRC", "DST", Vec::new(), None), dir.path());

    let summary = orch.run(RunOptions::new()).await;
    assert_eq!(summary.added, 0);
    assert!(dst.add_calls.lock().unwrap().is_empty());
}
