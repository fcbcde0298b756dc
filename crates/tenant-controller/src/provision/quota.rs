//! Compute quota for the tenant namespace

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{ResourceQuota, ResourceQuotaSpec};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use kube::ResourceExt;
use tenant_common::crd::Tenant;
use tenant_common::kube_utils::owned_meta;
use tenant_common::QUOTA_MAX_PODS;

use super::{converge, steps, Outcome, ProvisionError};
use crate::context::Context;
use crate::objects::ManagedObject;

/// Name of the tenant's ResourceQuota
pub fn quota_name(tenant: &str) -> String {
    format!("{tenant}-quota")
}

/// Desired ResourceQuota for `tenant`
///
/// Quantities that do not parse fall back to the defaults rather than
/// failing the reconcile; admission rejects them before they get here.
pub(crate) fn desired_quota(tenant: &Tenant) -> Result<ManagedObject, ProvisionError> {
    let cpu = tenant.spec.resources.effective_cpu();
    let memory = tenant.spec.resources.effective_memory();

    let hard = BTreeMap::from([
        ("requests.cpu".to_string(), Quantity(cpu.to_string())),
        ("limits.cpu".to_string(), Quantity(cpu.to_string())),
        ("requests.memory".to_string(), Quantity(memory.to_string())),
        ("limits.memory".to_string(), Quantity(memory.to_string())),
        ("pods".to_string(), Quantity(QUOTA_MAX_PODS.to_string())),
    ]);

    let namespace = tenant.namespace_name();
    let metadata = owned_meta(tenant, quota_name(&tenant.name_any()), Some(&namespace))
        .map_err(ProvisionError::recoverable(steps::QUOTA))?;
    Ok(ManagedObject::ResourceQuota(ResourceQuota {
        metadata,
        spec: Some(ResourceQuotaSpec {
            hard: Some(hard),
            ..Default::default()
        }),
        ..Default::default()
    }))
}

/// Ensure the tenant ResourceQuota matches the declared limits
pub async fn ensure_quota(ctx: &Context, tenant: &Tenant) -> Result<Outcome, ProvisionError> {
    converge(ctx.kube.as_ref(), desired_quota(tenant)?)
        .await
        .map_err(ProvisionError::recoverable(steps::QUOTA))
}
