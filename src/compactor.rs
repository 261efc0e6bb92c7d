use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use crate::store::WalStore;

const CHECK_INTERVAL: Duration = Duration::from_secs(30);

/// Background task that rewrites a facility's WAL once enough events have
/// piled up since the last snapshot.
pub async fn run_compactor(store: Arc<WalStore>, threshold: u64) {
    let mut interval = tokio::time::interval(CHECK_INTERVAL);
    loop {
        interval.tick().await;
        compact_if_due(&store, threshold).await;
    }
}

/// One compaction check. Returns whether a compaction ran.
pub async fn compact_if_due(store: &WalStore, threshold: u64) -> bool {
    let pending = store.appends_since_compact().await;
    if pending < threshold {
        return false;
    }
    match store.compact().await {
        Ok(()) => {
            info!("compacted {} ({pending} events)", store.path().display());
            true
        }
        Err(e) => {
            tracing::warn!("compaction of {} failed: {e}", store.path().display());
            false
        }
    }
}
