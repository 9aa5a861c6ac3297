use std::time::Duration;

use tracing::{debug, info};

use crate::limits::BOOKING_FENCE_TTL_SECS;
use crate::model::*;
use crate::observability::*;
use crate::repository::{Admission, RepositoryError};
use crate::store::{encode_hold, keys, read_hold, read_index, ExecOutcome, Watch, WriteOp};

use super::{AcquireOutcome, Attempt, CommitOutcome, Conflict, Engine, EngineError, ReleaseOutcome};

impl Engine {
    /// Slot must exist, be unbooked, and sit on a day the admission policy has open.
    pub(super) async fn admit(&self, slot_id: SlotId) -> Result<SlotRecord, EngineError> {
        let admission = self.admission.admission().await;
        let Admission::Open(days) = admission else {
            return Err(EngineError::NoActivePeriod);
        };
        let slot = self
            .slots
            .get(slot_id)
            .await?
            .ok_or(EngineError::SlotNotFound(slot_id))?;
        if slot.booked {
            return Err(EngineError::SlotBooked(slot_id));
        }
        if !days.contains(&slot.day) {
            return Err(EngineError::DayNotEnabled {
                day: slot.day,
                enabled_days: days.into_iter().collect(),
            });
        }
        Ok(slot)
    }

    pub async fn acquire(
        &self,
        slot_id: SlotId,
        claimant: &Claimant,
    ) -> Result<AcquireOutcome, EngineError> {
        self.acquire_with_ttl(slot_id, claimant, self.policy.ttl).await
    }

    /// Create or renew the claimant's hold on `slot_id`.
    pub async fn acquire_with_ttl(
        &self,
        slot_id: SlotId,
        claimant: &Claimant,
        ttl: Duration,
    ) -> Result<AcquireOutcome, EngineError> {
        let slot = self.admit(slot_id).await?;
        let outcome = self
            .optimistic("acquire", || self.try_acquire(&slot, claimant, ttl))
            .await?;

        match &outcome {
            AcquireOutcome::Acquired { ttl, renewed, .. } => {
                let kind = if *renewed { "renewed" } else { "new" };
                metrics::counter!(HOLDS_ACQUIRED_TOTAL, "kind" => kind).increment(1);
                debug!("hold {kind}: slot {slot_id} by {}", claimant.holder);
                self.rooms.emit(RoomEvent::SlotHeld {
                    slot_id,
                    day: slot.day,
                    ttl: ttl_secs(*ttl),
                });
            }
            AcquireOutcome::Conflict(conflict) => {
                metrics::counter!(HOLD_CONFLICTS_TOTAL, "reason" => conflict.reason()).increment(1);
                debug!("hold rejected: slot {slot_id} by {}: {}", claimant.holder, conflict.reason());
            }
        }
        Ok(outcome)
    }

    async fn try_acquire(
        &self,
        slot: &SlotRecord,
        claimant: &Claimant,
        ttl: Duration,
    ) -> Result<Attempt<AcquireOutcome>, EngineError> {
        let store = &*self.store;
        let hold_key = keys::hold(slot.slot_id);
        let holder_key = keys::holder(&claimant.holder);
        let fence_key = keys::booked(slot.slot_id);

        let mut watched = vec![hold_key.as_str(), fence_key.as_str()];
        if self.policy.single_hold {
            watched.push(holder_key.as_str());
        }
        let mut watch = store.watch(&watched).await?;

        // `admit` may have read the repository before a commit landed.
        if store.read(&fence_key).await?.is_some() {
            return Err(EngineError::SlotBooked(slot.slot_id));
        }

        let (record, renewed) = match read_hold(store, slot.slot_id).await? {
            Some(mut hold) if hold.owner == claimant.holder => {
                // A renewal through another connection moves the hold to it.
                if claimant.session.is_some() {
                    hold.session = claimant.session;
                }
                (hold, true)
            }
            Some(hold) => {
                let Some(remaining) = store.ttl_remaining(&hold_key).await? else {
                    return Ok(Attempt::Retry);
                };
                return Ok(Attempt::Done(AcquireOutcome::Conflict(Conflict::HeldByOther {
                    owner: hold.owner,
                    ttl: remaining,
                })));
            }
            None => {
                if self.policy.single_hold
                    && let Some(other) = read_index(store, &holder_key).await?
                    && other != slot.slot_id
                {
                    let other_key = keys::hold(other);
                    watch.merge(store.watch(&[other_key.as_str()]).await?);
                    match read_hold(store, other).await? {
                        Some(other_hold) if other_hold.owner == claimant.holder => {
                            let Some(remaining) = store.ttl_remaining(&other_key).await? else {
                                return Ok(Attempt::Retry);
                            };
                            return Ok(Attempt::Done(AcquireOutcome::Conflict(
                                Conflict::HolderHasOther {
                                    slot_id: other,
                                    ttl: remaining,
                                },
                            )));
                        }
                        // Index outlived its hold; it gets overwritten below.
                        _ => debug!("stale holder index for {} -> slot {other}", claimant.holder),
                    }
                }
                (HoldRecord::new(slot, claimant), false)
            }
        };

        let index_value = slot.slot_id.to_string();
        let mut ops = vec![WriteOp::put(hold_key, encode_hold(&record)?, ttl)];
        if self.policy.single_hold {
            ops.push(WriteOp::put(holder_key, index_value.clone(), ttl));
        }
        if let Some(session) = record.session {
            ops.push(WriteOp::put(keys::session(session), index_value, ttl));
        }

        Ok(match store.exec(watch, ops).await? {
            ExecOutcome::Committed => Attempt::Done(AcquireOutcome::Acquired {
                hold: record,
                ttl,
                renewed,
            }),
            ExecOutcome::Aborted => Attempt::Retry,
        })
    }

    /// Drop the claimant's hold on `slot_id`. Never touches a hold it does not own.
    pub async fn release(
        &self,
        slot_id: SlotId,
        claimant: &Claimant,
    ) -> Result<ReleaseOutcome, EngineError> {
        let outcome = self
            .optimistic("release", || self.try_release(slot_id, claimant))
            .await?;

        metrics::counter!(HOLDS_RELEASED_TOTAL, "outcome" => outcome.reason()).increment(1);
        match outcome {
            ReleaseOutcome::Released { day } => {
                debug!("hold released: slot {slot_id} by {}", claimant.holder);
                self.rooms.emit(RoomEvent::SlotReleased { slot_id, day });
            }
            ReleaseOutcome::NoHold => self.clear_dangling(slot_id, claimant).await?,
            ReleaseOutcome::NotOwner => {
                debug!("release refused: slot {slot_id} not owned by {}", claimant.holder)
            }
        }
        Ok(outcome)
    }

    async fn try_release(
        &self,
        slot_id: SlotId,
        claimant: &Claimant,
    ) -> Result<Attempt<ReleaseOutcome>, EngineError> {
        let hold_key = keys::hold(slot_id);
        let mut watch = self.store.watch(&[hold_key.as_str()]).await?;

        let hold = match read_hold(&*self.store, slot_id).await? {
            None => return Ok(Attempt::Done(ReleaseOutcome::NoHold)),
            Some(hold) if !hold.is_owned_by(claimant) => {
                return Ok(Attempt::Done(ReleaseOutcome::NotOwner));
            }
            Some(hold) => hold,
        };

        let mut ops = vec![WriteOp::delete(hold_key)];
        ops.extend(self.index_deletes(&hold, &mut watch).await?);

        Ok(match self.store.exec(watch, ops).await? {
            ExecOutcome::Committed => Attempt::Done(ReleaseOutcome::Released { day: hold.day }),
            ExecOutcome::Aborted => Attempt::Retry,
        })
    }

    /// Deletes for the holder and session index entries of `hold`, limited to
    /// entries that still point at its slot. Watches each one it inspects.
    async fn index_deletes(
        &self,
        hold: &HoldRecord,
        watch: &mut Watch,
    ) -> Result<Vec<WriteOp>, EngineError> {
        let mut index_keys = vec![keys::holder(&hold.owner)];
        if let Some(session) = hold.session {
            index_keys.push(keys::session(session));
        }

        let mut ops = Vec::new();
        for key in index_keys {
            watch.merge(self.store.watch(&[key.as_str()]).await?);
            if read_index(&*self.store, &key).await? == Some(hold.slot_id) {
                ops.push(WriteOp::delete(key));
            }
        }
        Ok(ops)
    }

    /// Best-effort removal of the claimant's index entries still naming a slot
    /// that no longer has a hold.
    async fn clear_dangling(&self, slot_id: SlotId, claimant: &Claimant) -> Result<(), EngineError> {
        let mut index_keys = vec![keys::holder(&claimant.holder)];
        if let Some(session) = claimant.session {
            index_keys.push(keys::session(session));
        }
        for key in index_keys {
            let watch = self.store.watch(&[key.as_str()]).await?;
            if read_index(&*self.store, &key).await? == Some(slot_id)
                && self.store.exec(watch, vec![WriteOp::delete(key.clone())]).await?
                    == ExecOutcome::Committed
            {
                debug!("cleared dangling index {key}");
            }
        }
        Ok(())
    }

    /// Hand a held slot over to the repository as a booking.
    ///
    /// Ownership is re-checked here even though the caller just held the slot:
    /// the hold may have expired between the client's decision and this call.
    /// The check and a `booked:` marker land in one exec, so nothing can take
    /// the slot between it and `mark_booked`.
    pub async fn commit(
        &self,
        slot_id: SlotId,
        claimant: &Claimant,
    ) -> Result<CommitOutcome, EngineError> {
        let slot = self
            .slots
            .get(slot_id)
            .await?
            .ok_or(EngineError::SlotNotFound(slot_id))?;
        if slot.booked {
            return Err(EngineError::SlotBooked(slot_id));
        }

        let fenced = self
            .optimistic("commit", || self.try_fence(slot_id, claimant))
            .await?;
        if !matches!(fenced, CommitOutcome::Committed { .. }) {
            return Ok(fenced);
        }

        if let Err(e) = self.slots.mark_booked(slot_id).await {
            if !matches!(e, RepositoryError::AlreadyBooked(_)) {
                // Not booked after all; give the slot back to its holder.
                self.store.delete(&keys::booked(slot_id)).await?;
            }
            return Err(e.into());
        }

        // The marker kept everyone else out, so any hold left is the committer's.
        self.optimistic("commit", || self.try_clear(slot_id)).await?;

        metrics::counter!(HOLDS_COMMITTED_TOTAL).increment(1);
        info!("slot {slot_id} booked by {}", claimant.holder);
        self.rooms.emit(RoomEvent::SlotBooked {
            slot_id,
            day: slot.day,
        });
        Ok(CommitOutcome::Committed { day: slot.day })
    }

    async fn try_fence(
        &self,
        slot_id: SlotId,
        claimant: &Claimant,
    ) -> Result<Attempt<CommitOutcome>, EngineError> {
        let hold_key = keys::hold(slot_id);
        let fence_key = keys::booked(slot_id);
        let watch = self
            .store
            .watch(&[hold_key.as_str(), fence_key.as_str()])
            .await?;

        if self.store.read(&fence_key).await?.is_some() {
            return Err(EngineError::SlotBooked(slot_id));
        }
        let hold = match read_hold(&*self.store, slot_id).await? {
            None => return Ok(Attempt::Done(CommitOutcome::NoHold)),
            Some(hold) if !hold.is_owned_by(claimant) => {
                return Ok(Attempt::Done(CommitOutcome::NotOwner));
            }
            Some(hold) => hold,
        };

        let fence = WriteOp::put(
            fence_key,
            hold.owner.to_string(),
            Duration::from_secs(BOOKING_FENCE_TTL_SECS),
        );
        Ok(match self.store.exec(watch, vec![fence]).await? {
            ExecOutcome::Committed => Attempt::Done(CommitOutcome::Committed { day: hold.day }),
            ExecOutcome::Aborted => Attempt::Retry,
        })
    }

    async fn try_clear(&self, slot_id: SlotId) -> Result<Attempt<()>, EngineError> {
        let hold_key = keys::hold(slot_id);
        let mut watch = self.store.watch(&[hold_key.as_str()]).await?;
        let Some(hold) = read_hold(&*self.store, slot_id).await? else {
            return Ok(Attempt::Done(()));
        };
        let mut ops = vec![WriteOp::delete(hold_key)];
        ops.extend(self.index_deletes(&hold, &mut watch).await?);
        Ok(match self.store.exec(watch, ops).await? {
            ExecOutcome::Committed => Attempt::Done(()),
            ExecOutcome::Aborted => Attempt::Retry,
        })
    }
}
