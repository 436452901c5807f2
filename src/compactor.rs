use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use crate::store::Ledger;

/// Background task that compacts the WAL once enough appends pile up.
pub async fn run_compactor(ledger: Arc<Ledger>, threshold: u64, every: Duration) {
    let mut interval = tokio::time::interval(every);
    loop {
        interval.tick().await;
        compact_if_due(&ledger, threshold).await;
    }
}

/// Returns whether a compaction ran.
async fn compact_if_due(ledger: &Ledger, threshold: u64) -> bool {
    let appends = match ledger.appends_since_compact().await {
        Ok(n) => n,
        Err(e) => {
            tracing::warn!("compactor skip: {e}");
            return false;
        }
    };
    if appends < threshold {
        return false;
    }
    match ledger.compact().await {
        Ok(()) => {
            info!("compacted WAL after {appends} appends");
            true
        }
        Err(e) => {
            tracing::error!("WAL compaction failed: {e}");
            false
        }
    }
}
