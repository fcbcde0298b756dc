//! Per-tenant mutual exclusion
//!
//! The controller runtime never runs two reconciles of the same object at
//! once, but the drift loop runs outside it. Both take the tenant's lock so
//! provisioning and drift correction of one tenant never interleave.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Lock table keyed by tenant name
#[derive(Debug, Default)]
pub struct TenantLocks {
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl TenantLocks {
    /// Create an empty lock table
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `tenant`
    pub async fn acquire(&self, tenant: &str) -> OwnedMutexGuard<()> {
        // Clone the Arc out so the map shard is not held across the await
        let lock = self
            .locks
            .entry(tenant.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        lock.lock_owned().await
    }

    /// Drop the entry for a deleted tenant if nobody holds or waits on it
    pub fn forget(&self, tenant: &str) {
        self.locks
            .remove_if(tenant, |_, lock| Arc::strong_count(lock) == 1);
    }

    /// Number of tenants with a lock entry
    pub fn len(&self) -> usize {
        self.locks.len()
    }

    /// True if no tenant has a lock entry
    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn same_tenant_is_serialized() {
        let locks = Arc::new(TenantLocks::new());
        let guard = locks.acquire("acme").await;

        let contender = {
            let locks = locks.clone();
            tokio::spawn(async move {
                let _guard = locks.acquire("acme").await;
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!contender.is_finished());

        drop(guard);
        contender.await.unwrap();
    }

    #[tokio::test]
    async fn different_tenants_do_not_block() {
        let locks = TenantLocks::new();
        let _acme = locks.acquire("acme").await;
        let _globex = tokio::time::timeout(Duration::from_millis(50), locks.acquire("globex"))
            .await
            .expect("independent tenant lock is free");
        assert_eq!(locks.len(), 2);
    }

    #[tokio::test]
    async fn forget_skips_held_locks() {
        let locks = TenantLocks::new();
        let guard = locks.acquire("acme").await;
        locks.forget("acme");
        assert_eq!(locks.len(), 1);

        drop(guard);
        locks.forget("acme");
        assert!(locks.is_empty());
    }
}
