//! Watch event filtering
//!
//! The reconciler writes status, finalizers and annotations on the Tenant,
//! and each write comes back as a watch event. Only changes to the spec or
//! the deletion timestamp warrant a new reconcile.

use dashmap::DashMap;
use kube::ResourceExt;
use tenant_common::crd::Tenant;

/// True if moving from `old` to `new` requires a reconcile
pub fn should_reconcile(old: &Tenant, new: &Tenant) -> bool {
    old.spec != new.spec || old.metadata.deletion_timestamp != new.metadata.deletion_timestamp
}

/// Remembers the last admitted version of each Tenant
#[derive(Debug, Default)]
pub struct ChangeFilter {
    seen: DashMap<String, Tenant>,
}

impl ChangeFilter {
    /// Create an empty filter
    pub fn new() -> Self {
        Self::default()
    }

    /// Decide whether `tenant` should reach the reconciler
    ///
    /// The first sighting of a tenant is always admitted.
    pub fn admit(&self, tenant: &Tenant) -> bool {
        let name = tenant.name_any();
        let changed = self
            .seen
            .get(&name)
            .map_or(true, |previous| should_reconcile(previous.value(), tenant));
        if changed {
            self.seen.insert(name, tenant.clone());
        }
        changed
    }

    /// Drop a tenant that no longer exists
    pub fn forget(&self, name: &str) {
        self.seen.remove(name);
    }
}
