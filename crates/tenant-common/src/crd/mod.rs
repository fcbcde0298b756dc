//! Custom Resource Definitions for the tenant operator
//!
//! The `Tenant` resource is the single source of truth for a tenant
//! environment. Its spec is authored by users and its status is owned by the
//! reconciler.

mod quantity;
mod tenant;

pub use quantity::{is_valid_cpu, is_valid_memory, DEFAULT_CPU, DEFAULT_MEMORY};
pub use tenant::{
    NetworkSpec, ResourceSpec, Tenant, TenantSpec, TenantState, TenantStatus, TenantTier,
};
