use tracing::warn;

use crate::limits::SCAN_BATCH;
use crate::model::*;
use crate::observability::DECODE_FAILURES_TOTAL;
use crate::store::{decode_hold, keys, read_hold};

use super::{Engine, EngineError};

impl Engine {
    /// FREE / HELD / BOOKED for one slot. The repository decides BOOKED; the
    /// store is not consulted for booked slots.
    pub async fn status(&self, slot_id: SlotId) -> Result<SlotStatus, EngineError> {
        let slot = self
            .slots
            .get(slot_id)
            .await?
            .ok_or(EngineError::SlotNotFound(slot_id))?;
        self.status_of(&slot).await
    }

    async fn status_of(&self, slot: &SlotRecord) -> Result<SlotStatus, EngineError> {
        if slot.booked {
            return Ok(SlotStatus::Booked);
        }
        let Some(hold) = read_hold(&*self.store, slot.slot_id).await? else {
            return Ok(SlotStatus::Free);
        };
        Ok(match self.store.ttl_remaining(&keys::hold(slot.slot_id)).await? {
            Some(ttl) => SlotStatus::Held {
                owner: hold.owner,
                ttl,
            },
            None => SlotStatus::Free,
        })
    }

    /// Every live hold, gathered with a cursor scan in bounded batches.
    /// Entries whose TTL is already gone by the time we look are dropped.
    pub async fn list_holds(&self) -> Result<Vec<HoldInfo>, EngineError> {
        let mut holds = Vec::new();
        let mut cursor: Option<String> = None;
        loop {
            let page = self
                .store
                .scan(keys::HOLD_PREFIX, cursor.as_deref(), SCAN_BATCH)
                .await?;
            for (key, raw) in page.entries {
                let hold = match decode_hold(&key, &raw) {
                    Ok(hold) => hold,
                    Err(e) => {
                        metrics::counter!(DECODE_FAILURES_TOTAL).increment(1);
                        warn!("skipping hold: {e}");
                        continue;
                    }
                };
                let Some(ttl) = self.store.ttl_remaining(&key).await? else {
                    continue;
                };
                holds.push(HoldInfo {
                    slot_id: hold.slot_id,
                    owner: hold.owner,
                    day: hold.day,
                    ttl: ttl_secs(ttl),
                });
            }
            match page.next {
                Some(next) => cursor = Some(next),
                None => break,
            }
        }
        holds.sort_by_key(|h| h.slot_id);
        Ok(holds)
    }

    /// State of every slot on `day`, as sent to a client joining that room.
    pub async fn snapshot(&self, day: Day) -> Result<DaySnapshot, EngineError> {
        let mut snapshot = DaySnapshot {
            day,
            booked: Vec::new(),
            held: Vec::new(),
        };
        for slot in self.slots.slots_for_day(day).await? {
            match self.status_of(&slot).await? {
                SlotStatus::Booked => snapshot.booked.push(slot.slot_id),
                SlotStatus::Held { ttl, .. } => snapshot.held.push(HeldSlot {
                    slot_id: slot.slot_id,
                    ttl: ttl_secs(ttl),
                }),
                SlotStatus::Free => {}
            }
        }
        Ok(snapshot)
    }
}
