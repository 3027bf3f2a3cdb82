use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::engine::{Engine, EngineError};
use crate::observability::WAL_COMPACTIONS_TOTAL;

const CHECK_INTERVAL: Duration = Duration::from_secs(30);

/// Compact once the WAL has grown by `threshold` appends. Returns whether it ran.
pub async fn compact_if_needed(engine: &Engine, threshold: u64) -> Result<bool, EngineError> {
    let appends = engine.wal_appends_since_compact().await;
    if appends < threshold {
        debug!(appends, threshold, "compaction not needed");
        return Ok(false);
    }
    engine.compact_wal().await?;
    info!(
        appends,
        rooms = engine.room_count(),
        reservations = engine.reservation_count(),
        "WAL compacted"
    );
    Ok(true)
}

/// Background task: periodically rewrite one hotel's WAL down to its live state.
pub async fn run_compactor(engine: Arc<Engine>, threshold: u64) {
    let mut interval = tokio::time::interval(CHECK_INTERVAL);
    loop {
        interval.tick().await;
        match compact_if_needed(&engine, threshold).await {
            Ok(true) => metrics::counter!(WAL_COMPACTIONS_TOTAL, "status" => "ok").increment(1),
            Ok(false) => {}
            Err(e) => {
                metrics::counter!(WAL_COMPACTIONS_TOTAL, "status" => "error").increment(1);
                warn!("compaction failed: {e}");
            }
        }
    }
}
