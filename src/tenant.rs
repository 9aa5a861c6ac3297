use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::engine::{Engine, HoldPolicy};
use crate::limits::*;
use crate::reaper;
use crate::repository::Seed;
use crate::rooms::RoomHub;
use crate::store::MemoryStore;

pub const DEFAULT_TENANT: &str = "default";

/// Manages per-tenant engines. Each tenant gets its own Engine + store + rooms + reaper.
/// Tenant = `X-Tenant` header or `tenant` query parameter.
pub struct TenantManager {
    engines: DashMap<String, Arc<Engine>>,
    /// Places taken under `MAX_TENANTS`, counting engines still being built.
    reserved: AtomicUsize,
    data_dir: PathBuf,
    policy: HoldPolicy,
    reaper_interval: Duration,
    cancel: CancellationToken,
}

impl TenantManager {
    pub fn new(data_dir: PathBuf, policy: HoldPolicy, reaper_interval: Duration) -> Self {
        Self {
            engines: DashMap::new(),
            reserved: AtomicUsize::new(0),
            data_dir,
            policy,
            reaper_interval,
            cancel: CancellationToken::new(),
        }
    }

    /// Get or lazily create an engine for the given tenant.
    pub fn get_or_create(&self, tenant: &str) -> std::io::Result<Arc<Engine>> {
        if let Some(engine) = self.engines.get(tenant) {
            return Ok(engine.value().clone());
        }
        if tenant.len() > MAX_TENANT_NAME_LEN {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "tenant name too long",
            ));
        }

        // Sanitize tenant name to prevent path traversal
        let safe_name: String = tenant
            .chars()
            .filter(|c| c.is_alphanumeric() || *c == '_' || *c == '-')
            .collect();
        if safe_name.is_empty() {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "empty tenant name",
            ));
        }
        let engine = match self.engines.entry(safe_name) {
            Entry::Occupied(e) => e.get().clone(),
            Entry::Vacant(e) => {
                // The entry only locks its own shard; the cap spans all of them.
                if self.reserved.fetch_add(1, Ordering::SeqCst) >= MAX_TENANTS {
                    self.reserved.fetch_sub(1, Ordering::SeqCst);
                    return Err(std::io::Error::other("too many tenants"));
                }
                match self.build(e.key()) {
                    Ok(engine) => {
                        e.insert(engine.clone());
                        engine
                    }
                    Err(err) => {
                        self.reserved.fetch_sub(1, Ordering::SeqCst);
                        return Err(err);
                    }
                }
            }
        };
        metrics::gauge!(crate::observability::TENANTS_ACTIVE).set(self.engines.len() as f64);
        Ok(engine)
    }

    fn build(&self, name: &str) -> std::io::Result<Arc<Engine>> {
        let seed_path = self.data_dir.join(format!("{name}.json"));
        let (slots, admission) = Seed::load(&seed_path)?.into_backends();
        info!("tenant {name}: {} slots from {}", slots.len(), seed_path.display());

        let engine = Arc::new(Engine::new(
            Arc::new(MemoryStore::new()),
            Arc::new(slots),
            Arc::new(admission),
            Arc::new(RoomHub::new()),
            self.policy.clone(),
        ));

        tokio::spawn(reaper::run_reaper(
            engine.clone(),
            self.reaper_interval,
            self.cancel.child_token(),
        ));
        Ok(engine)
    }

    pub fn len(&self) -> usize {
        self.engines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.engines.is_empty()
    }

    /// Stop every tenant's background work.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }
}

impl Drop for TenantManager {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::*;
    use std::fs;
    use ulid::Ulid;

    fn test_data_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir()
            .join("slothold_test_tenant")
            .join(format!("{name}_{}", Ulid::new()));
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn write_seed(dir: &std::path::Path, tenant: &str) {
        let seed = r#"{
            "enabled_days": ["2025-03-01"],
            "slots": [{"slot_id": 42, "day": "2025-03-01"}]
        }"#;
        fs::write(dir.join(format!("{tenant}.json")), seed).unwrap();
    }

    fn manager(dir: PathBuf) -> TenantManager {
        TenantManager::new(dir, HoldPolicy::default(), Duration::from_secs(5))
    }

    #[tokio::test]
    async fn tenant_isolation() {
        let dir = test_data_dir("isolation");
        write_seed(&dir, "tenant_a");
        write_seed(&dir, "tenant_b");
        let tm = manager(dir);

        let eng_a = tm.get_or_create("tenant_a").unwrap();
        let eng_b = tm.get_or_create("tenant_b").unwrap();

        // Same slot id in both tenants; a hold in A is invisible to B
        let outcome = eng_a
            .acquire(42, &Claimant::holder(HolderId::new("alice")))
            .await
            .unwrap();
        assert!(outcome.is_acquired());
        assert!(matches!(eng_a.status(42).await.unwrap(), SlotStatus::Held { .. }));
        assert_eq!(eng_b.status(42).await.unwrap(), SlotStatus::Free);
    }

    #[tokio::test]
    async fn missing_seed_means_no_active_period() {
        let dir = test_data_dir("no_seed");
        let tm = manager(dir);
        let engine = tm.get_or_create("fresh").unwrap();
        assert!(matches!(
            engine.acquire(1, &Claimant::holder(HolderId::new("a"))).await,
            Err(crate::engine::EngineError::NoActivePeriod)
        ));
    }

    #[tokio::test]
    async fn malformed_seed_rejected() {
        let dir = test_data_dir("bad_seed");
        fs::write(dir.join("broken.json"), "{not json").unwrap();
        let tm = manager(dir);
        let err = tm.get_or_create("broken").err().unwrap();
        assert_eq!(err.kind(), std::io::ErrorKind::InvalidData);
        assert!(tm.is_empty());
    }

    #[tokio::test]
    async fn tenant_same_engine_returned() {
        let dir = test_data_dir("same_eng");
        let tm = manager(dir);

        let eng1 = tm.get_or_create("foo").unwrap();
        let eng2 = tm.get_or_create("foo").unwrap();

        // Should be the same Arc
        assert!(Arc::ptr_eq(&eng1, &eng2));
    }

    #[tokio::test]
    async fn tenant_name_sanitized() {
        let dir = test_data_dir("sanitize");
        write_seed(&dir, "evil");
        let tm = manager(dir);

        // Path traversal attempt resolves to the sanitized tenant
        let traversal = tm.get_or_create("../evil").unwrap();
        let plain = tm.get_or_create("evil").unwrap();
        assert!(Arc::ptr_eq(&traversal, &plain));
        assert_eq!(tm.len(), 1);

        // Empty after sanitization
        let result = tm.get_or_create("../..");
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn tenant_name_too_long() {
        let dir = test_data_dir("name_too_long");
        let tm = manager(dir);

        let long_name = "x".repeat(MAX_TENANT_NAME_LEN + 1);
        let result = tm.get_or_create(&long_name);
        assert!(result.is_err());
        let err = result.err().unwrap();
        assert!(err.to_string().contains("tenant name too long"));
    }

    #[tokio::test]
    async fn tenant_count_limit() {
        let dir = test_data_dir("count_limit");
        let tm = manager(dir);

        for i in 0..MAX_TENANTS {
            tm.get_or_create(&format!("t{i}")).unwrap();
        }
        let result = tm.get_or_create("one_more");
        assert!(result.is_err());
        let err = result.err().unwrap();
        assert!(err.to_string().contains("too many tenants"));

        // Existing tenants stay reachable at the cap
        assert!(tm.get_or_create("t0").is_ok());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_creation_respects_cap() {
        let dir = test_data_dir("count_race");
        let tm = Arc::new(manager(dir));
        for i in 0..MAX_TENANTS - 1 {
            tm.get_or_create(&format!("t{i}")).unwrap();
        }

        let mut tasks = Vec::new();
        for i in 0..16 {
            let tm = tm.clone();
            tasks.push(tokio::spawn(async move {
                tm.get_or_create(&format!("late{i}")).is_ok()
            }));
        }
        let mut created = 0;
        for task in tasks {
            if task.await.unwrap() {
                created += 1;
            }
        }
        assert_eq!(created, 1);
        assert_eq!(tm.len(), MAX_TENANTS);
    }

    #[tokio::test]
    async fn failed_creation_frees_its_place() {
        let dir = test_data_dir("count_refund");
        fs::write(dir.join("broken.json"), "{not json").unwrap();
        let tm = manager(dir);
        for i in 0..MAX_TENANTS - 1 {
            tm.get_or_create(&format!("t{i}")).unwrap();
        }
        assert!(tm.get_or_create("broken").is_err());
        assert!(tm.get_or_create("last").is_ok());
        assert_eq!(tm.len(), MAX_TENANTS);
    }
}
