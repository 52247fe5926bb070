use serde_json::json;

use medley_model::MediaItem;

use crate::events::Emitter;

/// Abort a removal batch that would wipe more than `suspect_ratio` of the
/// destination baseline, unless mass deletes are explicitly allowed.
///
/// Adds are never touched by this guard.
pub fn maybe_block_mass_delete(
    removes: Vec<MediaItem>,
    baseline_size: usize,
    allow_mass_delete: bool,
    suspect_ratio: f64,
    emitter: &Emitter,
    dst_name: &str,
    feature: &str,
) -> Vec<MediaItem> {
    if allow_mass_delete || removes.is_empty() {
        return removes;
    }

    let ratio = if suspect_ratio > 0.0 { suspect_ratio } else { 0.10 };
    let threshold = (baseline_size as f64 * ratio) as usize;

    if removes.len() > threshold {
        emitter.emit(
            "mass_delete:blocked",
            json!({
                "dst": dst_name,
                "feature": feature,
                "attempted": removes.len(),
                "baseline": baseline_size,
                "threshold": threshold,
            }),
        );
        return Vec::new();
    }
    removes
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;
    use std::sync::{Arc, Mutex};

    fn items(n: usize) -> Vec<MediaItem> {
        (0..n)
            .map(|i| MediaItem {
                ids: [(medley_model::IdKind::Imdb, format!("tt{i:05}"))].into(),
                ..Default::default()
            })
            .collect()
    }

    fn capture() -> (Emitter, Arc<Mutex<Vec<String>>>) {
        let lines = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&lines);
        (
            Emitter::new(Some(Arc::new(move |l: &str| sink.lock().unwrap().push(l.to_string()))), false),
            lines,
        )
    }

    #[test]
    fn blocks_above_threshold() {
        let (emitter, lines) = capture();
        let out = maybe_block_mass_delete(items(30), 100, false, 0.10, &emitter, "DST", "watchlist");
        assert!(out.is_empty());

        let got = lines.lock().unwrap();
        let v: Value = serde_json::from_str(&got[0]).unwrap();
        assert_eq!(v["event"], "mass_delete:blocked");
        assert_eq!(v["attempted"], 30);
        assert_eq!(v["baseline"], 100);
        assert_eq!(v["threshold"], 10);
    }

    #[test]
    fn passes_below_threshold() {
        let (emitter, lines) = capture();
        let out = maybe_block_mass_delete(items(5), 100, false, 0.10, &emitter, "DST", "watchlist");
        assert_eq!(out.len(), 5);
        assert!(lines.lock().unwrap().is_empty());
    }

    #[test]
    fn allow_flag_disables_the_guard() {
        let (emitter, _) = capture();
        let out = maybe_block_mass_delete(items(90), 100, true, 0.10, &emitter, "DST", "watchlist");
        assert_eq!(out.len(), 90);
    }

    #[test]
    fn empty_baseline_blocks_any_removal() {
        let (emitter, _) = capture();
        let out = maybe_block_mass_delete(items(1), 0, false, 0.10, &emitter, "DST", "watchlist");
        assert!(out.is_empty());
    }
}
