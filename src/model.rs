use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Slot identity as assigned by the slot repository.
pub type SlotId = u64;

/// Calendar day a slot belongs to. Doubles as the broadcast partition key.
pub type Day = NaiveDate;

/// One live WebSocket connection.
pub type SessionId = Ulid;

/// Opaque caller identity handed in by the authentication layer.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HolderId(String);

impl HolderId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for HolderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for HolderId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Who is asking. A claimant carrying a session is scoped to that connection:
/// it only owns holds that were placed through the same session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Claimant {
    pub holder: HolderId,
    pub session: Option<SessionId>,
}

impl Claimant {
    pub fn holder(holder: HolderId) -> Self {
        Self { holder, session: None }
    }

    pub fn session(holder: HolderId, session: SessionId) -> Self {
        Self {
            holder,
            session: Some(session),
        }
    }
}

/// Slot as seen through the repository.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotRecord {
    pub slot_id: SlotId,
    pub day: Day,
    #[serde(default)]
    pub booked: bool,
}

/// The value stored under `hold:{slot_id}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HoldRecord {
    pub owner: HolderId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session: Option<SessionId>,
    pub slot_id: SlotId,
    pub day: Day,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, String>,
}

impl HoldRecord {
    pub fn new(slot: &SlotRecord, claimant: &Claimant) -> Self {
        Self {
            owner: claimant.holder.clone(),
            session: claimant.session,
            slot_id: slot.slot_id,
            day: slot.day,
            metadata: BTreeMap::new(),
        }
    }

    /// Holder must match; a session-scoped claimant must also match the session.
    pub fn is_owned_by(&self, claimant: &Claimant) -> bool {
        self.owner == claimant.holder
            && claimant.session.is_none_or(|s| self.session == Some(s))
    }
}

// ── Query result types ───────────────────────────────────────────

/// Three-way availability of a slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SlotStatus {
    Free,
    Held { owner: HolderId, ttl: Duration },
    Booked,
}

impl SlotStatus {
    pub fn label(&self) -> &'static str {
        match self {
            SlotStatus::Free => "FREE",
            SlotStatus::Held { .. } => "HOLD",
            SlotStatus::Booked => "BOOKED",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HoldInfo {
    pub slot_id: SlotId,
    pub owner: HolderId,
    pub day: Day,
    pub ttl: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeldSlot {
    pub slot_id: SlotId,
    pub ttl: u64,
}

/// Full state of one day's room, sent on join.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DaySnapshot {
    pub day: Day,
    pub booked: Vec<SlotId>,
    pub held: Vec<HeldSlot>,
}

/// Incremental room events. This is also the wire format pushed to spectators.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum RoomEvent {
    SlotHeld { slot_id: SlotId, day: Day, ttl: u64 },
    SlotReleased { slot_id: SlotId, day: Day },
    SlotBooked { slot_id: SlotId, day: Day },
}

impl RoomEvent {
    pub fn day(&self) -> Day {
        match self {
            RoomEvent::SlotHeld { day, .. }
            | RoomEvent::SlotReleased { day, .. }
            | RoomEvent::SlotBooked { day, .. } => *day,
        }
    }
}

/// Whole seconds left, rounded up so a fresh 120s hold reports 120.
pub fn ttl_secs(ttl: Duration) -> u64 {
    let secs = ttl.as_secs();
    if ttl.subsec_nanos() > 0 { secs + 1 } else { secs }
}
