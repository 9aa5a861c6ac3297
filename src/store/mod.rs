//! Shared key-value store with per-key TTL.
//!
//! The engine never touches a concrete store. It talks to [`HoldStore`], whose
//! contract mirrors what a networked cache offers: atomic set-if-absent, TTL
//! reads, cursor scans and optimistic transactions (watch a set of keys, then
//! execute a batch of writes only if none of them changed in between).

mod memory;

pub use memory::MemoryStore;

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::model::{HoldRecord, HolderId, SessionId, SlotId};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("undecodable value under {key}: {reason}")]
    Decode { key: String, reason: String },
    #[error("unencodable hold: {0}")]
    Encode(String),
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Versions of a set of keys as observed at watch time.
/// `None` means the key was absent (or already expired).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Watch {
    versions: Vec<(String, Option<u64>)>,
}

impl Watch {
    pub fn new(versions: Vec<(String, Option<u64>)>) -> Self {
        Self { versions }
    }

    /// Fold keys watched later in the same transaction into this one.
    pub fn merge(&mut self, other: Watch) {
        for (key, version) in other.versions {
            if !self.versions.iter().any(|(k, _)| *k == key) {
                self.versions.push((key, version));
            }
        }
    }

    pub fn versions(&self) -> &[(String, Option<u64>)] {
        &self.versions
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteOp {
    Put {
        key: String,
        value: String,
        ttl: Duration,
    },
    Delete {
        key: String,
    },
}

impl WriteOp {
    pub fn put(key: String, value: String, ttl: Duration) -> Self {
        WriteOp::Put { key, value, ttl }
    }

    pub fn delete(key: String) -> Self {
        WriteOp::Delete { key }
    }
}

/// Result of [`HoldStore::exec`]. `Aborted` means a watched key changed and
/// nothing was written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecOutcome {
    Committed,
    Aborted,
}

/// One batch of a cursor scan. `next` is `None` once the keyspace is exhausted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanPage {
    pub entries: Vec<(String, String)>,
    pub next: Option<String>,
}

#[async_trait]
pub trait HoldStore: Send + Sync + 'static {
    /// Write `value` only if `key` is absent. Atomic across concurrent callers.
    async fn try_create(&self, key: &str, value: String, ttl: Duration) -> Result<bool, StoreError>;

    async fn read(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Unconditional overwrite; resets the TTL.
    async fn refresh(&self, key: &str, value: String, ttl: Duration) -> Result<(), StoreError>;

    /// Returns whether a live key was removed.
    async fn delete(&self, key: &str) -> Result<bool, StoreError>;

    /// `None` if the key is absent or has no time left.
    async fn ttl_remaining(&self, key: &str) -> Result<Option<Duration>, StoreError>;

    /// Up to `count` live entries whose key starts with `prefix`, strictly after `cursor`.
    async fn scan(
        &self,
        prefix: &str,
        cursor: Option<&str>,
        count: usize,
    ) -> Result<ScanPage, StoreError>;

    async fn watch(&self, keys: &[&str]) -> Result<Watch, StoreError>;

    /// Apply `ops` atomically if every watched key still has its watched version.
    async fn exec(&self, watch: Watch, ops: Vec<WriteOp>) -> Result<ExecOutcome, StoreError>;

    /// Drop expired entries and report them. Stores that expire keys natively
    /// have nothing to report.
    async fn evict_expired(&self) -> Result<Vec<(String, String)>, StoreError> {
        Ok(Vec::new())
    }
}

// ── Key layout ───────────────────────────────────────────────────

pub mod keys {
    use super::*;

    pub const HOLD_PREFIX: &str = "hold:";
    pub const HOLDER_PREFIX: &str = "holder:";
    pub const SESSION_PREFIX: &str = "session:";
    pub const BOOKED_PREFIX: &str = "booked:";

    pub fn hold(slot_id: SlotId) -> String {
        format!("{HOLD_PREFIX}{slot_id}")
    }

    pub fn holder(holder: &HolderId) -> String {
        format!("{HOLDER_PREFIX}{holder}")
    }

    pub fn session(session: SessionId) -> String {
        format!("{SESSION_PREFIX}{session}")
    }

    /// Written by a commit before the repository is told; acquires treat it
    /// as BOOKED.
    pub fn booked(slot_id: SlotId) -> String {
        format!("{BOOKED_PREFIX}{slot_id}")
    }
}

// ── Typed values ─────────────────────────────────────────────────

pub fn encode_hold(hold: &HoldRecord) -> Result<String, StoreError> {
    serde_json::to_string(hold).map_err(|e| StoreError::Encode(e.to_string()))
}

pub fn decode_hold(key: &str, raw: &str) -> Result<HoldRecord, StoreError> {
    serde_json::from_str(raw).map_err(|e| StoreError::Decode {
        key: key.to_string(),
        reason: e.to_string(),
    })
}

pub fn decode_slot_id(key: &str, raw: &str) -> Result<SlotId, StoreError> {
    raw.parse().map_err(|_| StoreError::Decode {
        key: key.to_string(),
        reason: format!("not a slot id: {raw:?}"),
    })
}

/// Read and decode the hold for a slot.
pub async fn read_hold(
    store: &dyn HoldStore,
    slot_id: SlotId,
) -> Result<Option<HoldRecord>, StoreError> {
    let key = keys::hold(slot_id);
    match store.read(&key).await? {
        Some(raw) => decode_hold(&key, &raw).map(Some),
        None => Ok(None),
    }
}

/// Read and decode an index entry (holder or session) pointing at a slot.
pub async fn read_index(store: &dyn HoldStore, key: &str) -> Result<Option<SlotId>, StoreError> {
    match store.read(key).await? {
        Some(raw) => decode_slot_id(key, &raw).map(Some),
        None => Ok(None),
    }
}
