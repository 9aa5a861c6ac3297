use tracing::{debug, warn};

use crate::model::*;
use crate::store::{keys, read_index};

use super::{AcquireOutcome, Engine, EngineError, ReleaseOutcome};

impl Engine {
    /// Slot currently recorded for a live connection, if any. May be stale
    /// once the hold has expired.
    pub async fn session_slot(&self, session: SessionId) -> Result<Option<SlotId>, EngineError> {
        Ok(read_index(&*self.store, &keys::session(session)).await?)
    }

    /// Acquire on behalf of a connection, keeping it to one hold: a different
    /// slot already held through this session is released first.
    pub async fn acquire_for_session(
        &self,
        slot_id: SlotId,
        holder: &HolderId,
        session: SessionId,
    ) -> Result<AcquireOutcome, EngineError> {
        let claimant = Claimant::session(holder.clone(), session);
        if let Some(previous) = self.session_slot(session).await?
            && previous != slot_id
        {
            match self.release(previous, &claimant).await {
                Ok(outcome) => debug!(
                    "session {session}: dropped slot {previous} before holding {slot_id} ({})",
                    outcome.reason()
                ),
                Err(e) => warn!("session {session}: could not drop slot {previous}: {e}"),
            }
        }
        self.acquire(slot_id, &claimant).await
    }

    /// Disconnect cleanup. Releases whatever the session still holds; a hold
    /// that expired and was taken by someone else is left alone because
    /// `release` re-checks ownership.
    pub async fn end_session(
        &self,
        holder: &HolderId,
        session: SessionId,
    ) -> Result<Option<ReleaseOutcome>, EngineError> {
        let key = keys::session(session);
        let Some(slot_id) = read_index(&*self.store, &key).await? else {
            return Ok(None);
        };
        let outcome = self
            .release(slot_id, &Claimant::session(holder.clone(), session))
            .await?;
        // The session is gone, so its index entry goes regardless of outcome.
        self.store.delete(&key).await?;
        debug!("session {session} closed: slot {slot_id} {}", outcome.reason());
        Ok(Some(outcome))
    }
}
