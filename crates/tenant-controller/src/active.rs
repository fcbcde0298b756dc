//! Active tenant accounting
//!
//! The active-tenants gauge is an up/down counter, so it must move exactly
//! once per tenant entering or leaving Ready. Persisted status cannot tell
//! us that: after a restart every Ready tenant looks unchanged. This table
//! remembers which tenants this process has counted, and under which tier.

use dashmap::DashMap;
use tenant_common::crd::TenantTier;
use tenant_common::metrics::MetricsSink;

/// Tenants currently counted in the gauge, keyed by name
#[derive(Debug, Default)]
pub struct ActiveTenants {
    counted: DashMap<String, TenantTier>,
}

impl ActiveTenants {
    /// Create an empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Count `tenant` as Ready under `tier`
    ///
    /// Moves the gauge between tiers when the tenant was counted under
    /// another one. Returns true if the tenant was not counted before.
    pub fn mark_ready(&self, tenant: &str, tier: &TenantTier, metrics: &dyn MetricsSink) -> bool {
        match self.counted.insert(tenant.to_string(), tier.clone()) {
            None => {
                metrics.increment_active_tenant(tier);
                true
            }
            Some(previous) => {
                if previous != *tier {
                    metrics.decrement_active_tenant(&previous);
                    metrics.increment_active_tenant(tier);
                }
                false
            }
        }
    }

    /// Stop counting `tenant`, if it was counted
    pub fn mark_inactive(&self, tenant: &str, metrics: &dyn MetricsSink) {
        if let Some((_, tier)) = self.counted.remove(tenant) {
            metrics.decrement_active_tenant(&tier);
        }
    }

    /// Tier `tenant` is counted under
    pub fn tier_of(&self, tenant: &str) -> Option<TenantTier> {
        self.counted.get(tenant).map(|entry| entry.value().clone())
    }

    /// Number of counted tenants
    pub fn len(&self) -> usize {
        self.counted.len()
    }

    /// True if nothing is counted
    pub fn is_empty(&self) -> bool {
        self.counted.is_empty()
    }
}
