mod availability;
mod error;
mod protocol;
mod session;

pub use error::EngineError;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use crate::limits::MAX_TXN_ATTEMPTS;
use crate::model::*;
use crate::repository::{AdmissionPolicy, SlotRepository};
use crate::rooms::RoomHub;
use crate::store::HoldStore;

/// Tunables of the hold protocol.
#[derive(Debug, Clone)]
pub struct HoldPolicy {
    pub ttl: Duration,
    /// One live hold per holder across every slot and transport.
    pub single_hold: bool,
    /// Cap on optimistic transaction attempts per operation.
    pub max_attempts: usize,
}

impl Default for HoldPolicy {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(120),
            single_hold: true,
            max_attempts: MAX_TXN_ATTEMPTS,
        }
    }
}

// ── Outcomes ─────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AcquireOutcome {
    Acquired {
        hold: HoldRecord,
        ttl: Duration,
        renewed: bool,
    },
    Conflict(Conflict),
}

impl AcquireOutcome {
    pub fn is_acquired(&self) -> bool {
        matches!(self, AcquireOutcome::Acquired { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Conflict {
    /// Someone else holds the slot.
    HeldByOther { owner: HolderId, ttl: Duration },
    /// The caller already holds a different slot.
    HolderHasOther { slot_id: SlotId, ttl: Duration },
}

impl Conflict {
    pub fn reason(&self) -> &'static str {
        match self {
            Conflict::HeldByOther { .. } => "slot_on_hold",
            Conflict::HolderHasOther { .. } => "user_has_other_hold",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseOutcome {
    Released { day: Day },
    /// Nothing to release. Not an error.
    NoHold,
    NotOwner,
}

impl ReleaseOutcome {
    pub fn reason(&self) -> &'static str {
        match self {
            ReleaseOutcome::Released { .. } => "released",
            ReleaseOutcome::NoHold => "no_hold",
            ReleaseOutcome::NotOwner => "not_owner",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitOutcome {
    Committed { day: Day },
    NoHold,
    NotOwner,
}

/// One pass of an optimistic transaction.
pub(crate) enum Attempt<T> {
    Done(T),
    /// A watched key changed under us; start over.
    Retry,
}

// ── Engine ───────────────────────────────────────────────────────

/// The reservation engine of one tenant. All hold state lives in the store;
/// the engine itself only carries handles.
pub struct Engine {
    pub(super) store: Arc<dyn HoldStore>,
    pub(super) slots: Arc<dyn SlotRepository>,
    pub(super) admission: Arc<dyn AdmissionPolicy>,
    pub rooms: Arc<RoomHub>,
    pub(super) policy: HoldPolicy,
}

impl Engine {
    pub fn new(
        store: Arc<dyn HoldStore>,
        slots: Arc<dyn SlotRepository>,
        admission: Arc<dyn AdmissionPolicy>,
        rooms: Arc<RoomHub>,
        policy: HoldPolicy,
    ) -> Self {
        Self {
            store,
            slots,
            admission,
            rooms,
            policy,
        }
    }

    pub fn policy(&self) -> &HoldPolicy {
        &self.policy
    }

    pub fn store(&self) -> &Arc<dyn HoldStore> {
        &self.store
    }

    /// Drive `attempt` until it finishes or the attempt budget runs out.
    pub(crate) async fn optimistic<T, F, Fut>(
        &self,
        op: &'static str,
        mut attempt: F,
    ) -> Result<T, EngineError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<Attempt<T>, EngineError>>,
    {
        for n in 0..self.policy.max_attempts {
            match attempt().await? {
                Attempt::Done(value) => return Ok(value),
                Attempt::Retry => {
                    debug!("{op}: watched key changed, retry {}", n + 1);
                    metrics::counter!(crate::observability::TXN_RETRIES_TOTAL, "op" => op)
                        .increment(1);
                    tokio::task::yield_now().await;
                }
            }
        }
        Err(EngineError::RetriesExhausted(self.policy.max_attempts))
    }
}
