use std::sync::Arc;
use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::engine::Engine;
use crate::model::RoomEvent;
use crate::observability::{DECODE_FAILURES_TOTAL, HOLDS_REAPED_TOTAL};
use crate::store::{decode_hold, keys, StoreError};

/// Background task that evicts expired keys and tells each day's room about
/// holds that ran out.
pub async fn run_reaper(engine: Arc<Engine>, every: Duration, cancel: CancellationToken) {
    let mut interval = tokio::time::interval(every);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                debug!("reaper stopped");
                return;
            }
            _ = interval.tick() => {}
        }
        match reap_once(&engine).await {
            Ok(0) => {}
            Ok(n) => info!("reaped {n} expired holds"),
            Err(e) => warn!("reaper pass failed: {e}"),
        }
    }
}

/// One eviction pass. Returns the number of expired holds announced.
pub async fn reap_once(engine: &Engine) -> Result<usize, StoreError> {
    let evicted = engine.store().evict_expired().await?;
    let mut reaped = 0;
    for (key, raw) in evicted {
        if !key.starts_with(keys::HOLD_PREFIX) {
            continue;
        }
        let hold = match decode_hold(&key, &raw) {
            Ok(hold) => hold,
            Err(e) => {
                metrics::counter!(DECODE_FAILURES_TOTAL).increment(1);
                warn!("reaper: {e}");
                continue;
            }
        };
        debug!("hold on slot {} by {} expired", hold.slot_id, hold.owner);
        engine.rooms.emit(RoomEvent::SlotReleased {
            slot_id: hold.slot_id,
            day: hold.day,
        });
        reaped += 1;
    }
    metrics::counter!(HOLDS_REAPED_TOTAL).increment(reaped as u64);
    Ok(reaped)
}
