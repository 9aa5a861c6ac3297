use std::collections::BTreeMap;
use std::ops::Bound;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::time::Instant;

use super::{ExecOutcome, HoldStore, ScanPage, StoreError, Watch, WriteOp};

struct Entry {
    value: String,
    expires_at: Instant,
    /// Bumped on every write; compared by `exec` against the watched version.
    version: u64,
}

#[derive(Default)]
struct Inner {
    entries: BTreeMap<String, Entry>,
    next_version: u64,
}

impl Inner {
    /// Live entry for `key`. Expired entries stay in the map, invisible,
    /// until `evict_expired` reports them or a write replaces them.
    fn live(&self, key: &str, now: Instant) -> Option<&Entry> {
        self.entries.get(key).filter(|e| e.expires_at > now)
    }

    fn put(&mut self, key: String, value: String, ttl: Duration, now: Instant) {
        self.next_version += 1;
        self.entries.insert(
            key,
            Entry {
                value,
                expires_at: now + ttl,
                version: self.next_version,
            },
        );
    }
}

/// In-process hold store. One mutex guards the whole keyspace, so `exec` and
/// `try_create` are trivially atomic; no call awaits while holding it.
/// Expiry is lazy on access; `evict_expired` does the physical removal.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of entries physically present, expired or not.
    pub fn raw_len(&self) -> usize {
        self.inner.lock().entries.len()
    }
}

#[async_trait]
impl HoldStore for MemoryStore {
    async fn try_create(&self, key: &str, value: String, ttl: Duration) -> Result<bool, StoreError> {
        let now = Instant::now();
        let mut inner = self.inner.lock();
        if inner.live(key, now).is_some() {
            return Ok(false);
        }
        inner.put(key.to_string(), value, ttl, now);
        Ok(true)
    }

    async fn read(&self, key: &str) -> Result<Option<String>, StoreError> {
        let now = Instant::now();
        let inner = self.inner.lock();
        Ok(inner.live(key, now).map(|e| e.value.clone()))
    }

    async fn refresh(&self, key: &str, value: String, ttl: Duration) -> Result<(), StoreError> {
        let now = Instant::now();
        self.inner.lock().put(key.to_string(), value, ttl, now);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool, StoreError> {
        let now = Instant::now();
        let mut inner = self.inner.lock();
        let live = inner.live(key, now).is_some();
        inner.entries.remove(key);
        Ok(live)
    }

    async fn ttl_remaining(&self, key: &str) -> Result<Option<Duration>, StoreError> {
        let now = Instant::now();
        let inner = self.inner.lock();
        Ok(inner
            .live(key, now)
            .map(|e| e.expires_at.saturating_duration_since(now))
            .filter(|ttl| !ttl.is_zero()))
    }

    async fn scan(
        &self,
        prefix: &str,
        cursor: Option<&str>,
        count: usize,
    ) -> Result<ScanPage, StoreError> {
        let now = Instant::now();
        let count = count.max(1);
        let inner = self.inner.lock();
        let lower = match cursor {
            Some(c) => Bound::Excluded(c),
            None => Bound::Included(prefix),
        };

        let mut page = ScanPage::default();
        let mut last_key = None;
        for (key, entry) in inner
            .entries
            .range::<str, _>((lower, Bound::Unbounded))
            .take_while(|(k, _)| k.starts_with(prefix))
        {
            if page.entries.len() == count {
                page.next = last_key;
                return Ok(page);
            }
            last_key = Some(key.clone());
            if entry.expires_at > now {
                page.entries.push((key.clone(), entry.value.clone()));
            }
        }
        Ok(page)
    }

    async fn watch(&self, keys: &[&str]) -> Result<Watch, StoreError> {
        let now = Instant::now();
        let inner = self.inner.lock();
        let versions = keys
            .iter()
            .map(|k| (k.to_string(), inner.live(k, now).map(|e| e.version)))
            .collect();
        Ok(Watch::new(versions))
    }

    async fn exec(&self, watch: Watch, ops: Vec<WriteOp>) -> Result<ExecOutcome, StoreError> {
        let now = Instant::now();
        let mut inner = self.inner.lock();
        for (key, version) in watch.versions() {
            if inner.live(key, now).map(|e| e.version) != *version {
                return Ok(ExecOutcome::Aborted);
            }
        }
        for op in ops {
            match op {
                WriteOp::Put { key, value, ttl } => inner.put(key, value, ttl, now),
                WriteOp::Delete { key } => {
                    inner.entries.remove(&key);
                }
            }
        }
        Ok(ExecOutcome::Committed)
    }

    async fn evict_expired(&self) -> Result<Vec<(String, String)>, StoreError> {
        let now = Instant::now();
        let mut inner = self.inner.lock();
        let expired: Vec<String> = inner
            .entries
            .iter()
            .filter(|(_, e)| e.expires_at <= now)
            .map(|(k, _)| k.clone())
            .collect();
        Ok(expired
            .into_iter()
            .filter_map(|k| inner.entries.remove(&k).map(|e| (k, e.value)))
            .collect())
    }
}
