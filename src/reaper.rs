use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::notify::NotifyHub;
use crate::observability;
use crate::store::WalStore;

/// Background task that drops watch channels nobody listens to anymore.
pub async fn run_reaper(notify: Arc<NotifyHub>) {
    let mut interval = tokio::time::interval(Duration::from_secs(30));
    loop {
        interval.tick().await;
        let before = notify.channel_count();
        notify.prune();
        let reaped = before.saturating_sub(notify.channel_count());
        if reaped > 0 {
            debug!("reaped {reaped} idle watch channels");
        }
    }
}

/// Background task that rewrites the WAL once `threshold` appends have piled up.
pub async fn run_compactor(store: Arc<WalStore>, threshold: u64) {
    let mut interval = tokio::time::interval(Duration::from_secs(10));
    loop {
        interval.tick().await;
        if let Err(e) = compact_if_needed(&store, threshold).await {
            warn!("compaction failed: {e}");
        }
    }
}

/// Returns the snapshot size when a compaction ran.
pub async fn compact_if_needed(
    store: &WalStore,
    threshold: u64,
) -> Result<Option<usize>, crate::store::StoreError> {
    let appends = store.appends_since_compact().await?;
    if appends < threshold {
        return Ok(None);
    }
    let kept = store.compact().await?;
    metrics::counter!(observability::WAL_COMPACTIONS_TOTAL).increment(1);
    info!("compacted WAL: {appends} appends down to {kept} appointments");
    Ok(Some(kept))
}
