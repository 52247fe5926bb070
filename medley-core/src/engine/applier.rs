use std::time::Duration;

use serde_json::json;

use medley_config::{Config, SyncFeature};
use medley_contracts::{AdapterResult, ApplyOutcome, MediaAdapter};
use medley_model::MediaItem;

use crate::events::Emitter;
use crate::state::unresolved::UnresolvedStore;

const RETRY_ATTEMPTS: u32 = 3;
const RETRY_BASE: Duration = Duration::from_millis(500);

/// Aggregated result of a chunked apply call.
#[derive(Debug, Clone, Copy, Default)]
pub struct ChunkedOutcome {
    pub ok: bool,
    pub count: usize,
    pub unresolved: usize,
}

/// Run a provider call with exponential backoff: three attempts at
/// 0.5 s, 1 s, 2 s. Every error counts as transient here; classification
/// is the caller's business.
async fn call_with_retry(
    op: ApplyOp,
    adapter: &dyn MediaAdapter,
    cfg: &Config,
    chunk: &[MediaItem],
    feature: SyncFeature,
    dry_run: bool,
) -> AdapterResult<ApplyOutcome> {
    let mut last = None;
    for attempt in 0..RETRY_ATTEMPTS {
        let result = match op {
            ApplyOp::Add => adapter.add(cfg, chunk, feature, dry_run).await,
            ApplyOp::Remove => adapter.remove(cfg, chunk, feature, dry_run).await,
        };
        match result {
            Ok(res) => return Ok(res),
            Err(err) => {
                tracing::debug!(%err, attempt, "apply attempt failed");
                last = Some(err);
                tokio::time::sleep(RETRY_BASE * 2u32.pow(attempt)).await;
            }
        }
    }
    Err(last.expect("at least one attempt"))
}

fn note_unresolved(
    tag: &str,
    dst: &str,
    feature: SyncFeature,
    unresolved: &[MediaItem],
    emitter: &Emitter,
    store: &UnresolvedStore,
) -> usize {
    if unresolved.is_empty() {
        return 0;
    }
    emitter.emit(
        "apply:unresolved",
        json!({ "provider": dst, "feature": feature, "count": unresolved.len() }),
    );
    store.record_pending(dst, feature, unresolved, &format!("{tag}:provider_unresolved"));
    unresolved.len()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ApplyOp {
    Add,
    Remove,
}

impl ApplyOp {
    fn tag(&self) -> &'static str {
        match self {
            ApplyOp::Add => "apply:add",
            ApplyOp::Remove => "apply:remove",
        }
    }
}

#[allow(clippy::too_many_arguments)]
async fn apply_chunked(
    op: ApplyOp,
    adapter: &dyn MediaAdapter,
    cfg: &Config,
    dst: &str,
    feature: SyncFeature,
    items: &[MediaItem],
    dry_run: bool,
    emitter: &Emitter,
    unresolved_store: &UnresolvedStore,
    chunk_size: usize,
    chunk_pause_ms: u64,
) -> AdapterResult<ChunkedOutcome> {
    let tag = op.tag();
    let total = items.len();
    if total == 0 {
        return Ok(ChunkedOutcome { ok: true, count: 0, unresolved: 0 });
    }

    if chunk_size == 0 || total <= chunk_size {
        let res = call_with_retry(op, adapter, cfg, items, feature, dry_run).await?;
        let unresolved = note_unresolved(tag, dst, feature, &res.unresolved, emitter, unresolved_store);
        return Ok(ChunkedOutcome { ok: res.ok, count: res.count, unresolved });
    }

    let mut done = 0;
    let mut out = ChunkedOutcome { ok: true, count: 0, unresolved: 0 };
    let mut any_success = false;
    let mut last_err = None;

    for chunk in items.chunks(chunk_size) {
        let chunk_ok = match call_with_retry(op, adapter, cfg, chunk, feature, dry_run).await {
            Ok(res) => {
                any_success = true;
                out.count += res.count;
                out.unresolved +=
                    note_unresolved(tag, dst, feature, &res.unresolved, emitter, unresolved_store);
                out.ok = out.ok && res.ok;
                res.ok
            }
            Err(err) => {
                // A failed chunk contributes zero progress; keep going.
                tracing::warn!(%err, dst, %feature, "chunk failed after retries");
                out.ok = false;
                last_err = Some(err);
                false
            }
        };
        done += chunk.len();
        emitter.emit(
            format!("{tag}:progress").as_str(),
            json!({ "dst": dst, "feature": feature, "done": done, "total": total, "ok": chunk_ok }),
        );
        if chunk_pause_ms > 0 {
            tokio::time::sleep(Duration::from_millis(chunk_pause_ms)).await;
        }
    }

    match (any_success, last_err) {
        (false, Some(err)) => Err(err),
        _ => Ok(out),
    }
}

/// Apply additions with chunking, retries and inter-chunk pauses.
#[allow(clippy::too_many_arguments)]
pub async fn apply_add(
    adapter: &dyn MediaAdapter,
    cfg: &Config,
    dst: &str,
    feature: SyncFeature,
    items: &[MediaItem],
    dry_run: bool,
    emitter: &Emitter,
    unresolved_store: &UnresolvedStore,
    chunk_size: usize,
    chunk_pause_ms: u64,
) -> AdapterResult<ChunkedOutcome> {
    emitter.emit(
        "apply:add:start",
        json!({ "dst": dst, "feature": feature, "count": items.len() }),
    );
    let res = apply_chunked(
        ApplyOp::Add,
        adapter,
        cfg,
        dst,
        feature,
        items,
        dry_run,
        emitter,
        unresolved_store,
        chunk_size,
        chunk_pause_ms,
    )
    .await?;
    emitter.emit(
        "apply:add:done",
        json!({
            "dst": dst,
            "feature": feature,
            "count": res.count,
            "result": { "ok": res.ok, "count": res.count, "unresolved": res.unresolved },
        }),
    );
    Ok(res)
}

/// Apply removals; same shape as [`apply_add`].
#[allow(clippy::too_many_arguments)]
pub async fn apply_remove(
    adapter: &dyn MediaAdapter,
    cfg: &Config,
    dst: &str,
    feature: SyncFeature,
    items: &[MediaItem],
    dry_run: bool,
    emitter: &Emitter,
    unresolved_store: &UnresolvedStore,
    chunk_size: usize,
    chunk_pause_ms: u64,
) -> AdapterResult<ChunkedOutcome> {
    emitter.emit(
        "apply:remove:start",
        json!({ "dst": dst, "feature": feature, "count": items.len() }),
    );
    let res = apply_chunked(
        ApplyOp::Remove,
        adapter,
        cfg,
        dst,
        feature,
        items,
        dry_run,
        emitter,
        unresolved_store,
        chunk_size,
        chunk_pause_ms,
    )
    .await?;
    emitter.emit(
        "apply:remove:done",
        json!({
            "dst": dst,
            "feature": feature,
            "count": res.count,
            "result": { "ok": res.ok, "count": res.count, "unresolved": res.unresolved },
        }),
    );
    Ok(res)
}
