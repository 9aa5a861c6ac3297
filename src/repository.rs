//! External collaborators: the durable slot repository and the admission
//! policy deciding which days are currently open.
//!
//! The engine only reads from these, except for the booking hand-off
//! (`mark_booked`). The in-memory implementations back the standalone binary
//! and the tests; a deployment wires its own.

use std::collections::BTreeSet;
use std::path::Path;

use async_trait::async_trait;
use dashmap::DashMap;
use serde::Deserialize;
use thiserror::Error;

use crate::model::{Day, SlotId, SlotRecord};

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("slot {0} not found")]
    NotFound(SlotId),
    #[error("slot {0} already booked")]
    AlreadyBooked(SlotId),
    #[error("repository unavailable: {0}")]
    Unavailable(String),
}

#[async_trait]
pub trait SlotRepository: Send + Sync + 'static {
    async fn get(&self, slot_id: SlotId) -> Result<Option<SlotRecord>, RepositoryError>;

    /// Every slot on `day`, in slot id order.
    async fn slots_for_day(&self, day: Day) -> Result<Vec<SlotRecord>, RepositoryError>;

    /// Flip FREE to BOOKED. Fails if the slot is already booked.
    async fn mark_booked(&self, slot_id: SlotId) -> Result<(), RepositoryError>;
}

/// Which days currently accept holds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Admission {
    /// No admission period is running; nothing can be held.
    Closed,
    Open(BTreeSet<Day>),
}

#[async_trait]
pub trait AdmissionPolicy: Send + Sync + 'static {
    async fn admission(&self) -> Admission;
}

// ── In-memory implementations ────────────────────────────────────

#[derive(Default)]
pub struct MemorySlotRepository {
    slots: DashMap<SlotId, SlotRecord>,
}

impl MemorySlotRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, slot: SlotRecord) {
        self.slots.insert(slot.slot_id, slot);
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

#[async_trait]
impl SlotRepository for MemorySlotRepository {
    async fn get(&self, slot_id: SlotId) -> Result<Option<SlotRecord>, RepositoryError> {
        Ok(self.slots.get(&slot_id).map(|e| e.value().clone()))
    }

    async fn slots_for_day(&self, day: Day) -> Result<Vec<SlotRecord>, RepositoryError> {
        let mut slots: Vec<SlotRecord> = self
            .slots
            .iter()
            .filter(|e| e.value().day == day)
            .map(|e| e.value().clone())
            .collect();
        slots.sort_by_key(|s| s.slot_id);
        Ok(slots)
    }

    async fn mark_booked(&self, slot_id: SlotId) -> Result<(), RepositoryError> {
        let mut slot = self
            .slots
            .get_mut(&slot_id)
            .ok_or(RepositoryError::NotFound(slot_id))?;
        if slot.booked {
            return Err(RepositoryError::AlreadyBooked(slot_id));
        }
        slot.booked = true;
        Ok(())
    }
}

/// Admission fixed at construction time.
#[derive(Debug, Clone)]
pub struct StaticAdmission(Admission);

impl StaticAdmission {
    pub fn closed() -> Self {
        Self(Admission::Closed)
    }

    pub fn open(days: impl IntoIterator<Item = Day>) -> Self {
        Self(Admission::Open(days.into_iter().collect()))
    }
}

#[async_trait]
impl AdmissionPolicy for StaticAdmission {
    async fn admission(&self) -> Admission {
        self.0.clone()
    }
}

// ── Seed files ───────────────────────────────────────────────────

/// On-disk tenant seed: `{"enabled_days": [...] | null, "slots": [...]}`.
#[derive(Debug, Default, Deserialize)]
pub struct Seed {
    #[serde(default)]
    pub enabled_days: Option<Vec<Day>>,
    #[serde(default)]
    pub slots: Vec<SlotRecord>,
}

impl Seed {
    /// Missing file means an empty tenant with no active period.
    pub fn load(path: &Path) -> std::io::Result<Self> {
        match std::fs::read(path) {
            Ok(bytes) => serde_json::from_slice(&bytes)
                .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(e),
        }
    }

    pub fn into_backends(self) -> (MemorySlotRepository, StaticAdmission) {
        let repo = MemorySlotRepository::new();
        for slot in self.slots {
            repo.insert(slot);
        }
        let admission = match self.enabled_days {
            Some(days) => StaticAdmission::open(days),
            None => StaticAdmission::closed(),
        };
        (repo, admission)
    }
}
