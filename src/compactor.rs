use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info};

use crate::engine::Engine;

/// Background task that rewrites the journal once enough appends pile up.
pub async fn run_compactor(engine: Arc<Engine>, threshold: u64) {
    let mut interval = tokio::time::interval(Duration::from_secs(60));
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    loop {
        interval.tick().await;
        let appends = engine.journal_appends_since_compact().await;
        if appends < threshold {
            debug!("compactor idle: {appends} appends since last compaction");
            continue;
        }
        match engine.compact_journal().await {
            Ok(()) => info!("journal compacted after {appends} appends"),
            Err(e) => tracing::warn!("journal compaction failed: {e}"),
        }
    }
}
