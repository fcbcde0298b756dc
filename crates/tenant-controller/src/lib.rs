//! Tenant reconciliation
//!
//! Converges each `Tenant` toward its declared tier by running the
//! provisioners in order, keeps network isolation from drifting, and filters
//! watch events down to the ones that need a reconcile.

#![deny(missing_docs)]

pub mod active;
pub mod client;
pub mod context;
pub mod controller;
pub mod drift;
pub mod filter;
pub mod locks;
pub mod objects;
pub mod provision;

#[cfg(test)]
mod testing;

pub use active::ActiveTenants;
pub use client::{KubeClient, KubeClientImpl};
pub use context::{Context, ContextBuilder, Settings};
pub use controller::{error_policy, reconcile};
pub use drift::{detect_and_correct_network_isolation_drift, needs_drift_check, sweep_network_drift};
pub use filter::{should_reconcile, ChangeFilter};
pub use locks::TenantLocks;
pub use provision::{Outcome, ProvisionError};
