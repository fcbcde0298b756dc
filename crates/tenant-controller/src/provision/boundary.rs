//! Isolation boundary: the tenant's dedicated Namespace

use k8s_openapi::api::core::v1::Namespace;
use tenant_common::crd::{Tenant, TenantStatus};
use tenant_common::kube_utils::owned_meta;
use tracing::info;

use super::{converge, steps, Outcome, ProvisionError};
use crate::context::Context;
use crate::objects::ManagedObject;

/// Desired Namespace for `tenant`
pub(crate) fn desired_namespace(tenant: &Tenant) -> Result<ManagedObject, ProvisionError> {
    let metadata = owned_meta(tenant, tenant.namespace_name(), None)
        .map_err(ProvisionError::recoverable(steps::BOUNDARY))?;
    Ok(ManagedObject::Namespace(Namespace {
        metadata,
        ..Default::default()
    }))
}

/// Ensure the tenant Namespace exists and record its name in `status`
pub async fn ensure_isolation_boundary(
    ctx: &Context,
    tenant: &Tenant,
    status: &mut TenantStatus,
) -> Result<Outcome, ProvisionError> {
    let outcome = converge(ctx.kube.as_ref(), desired_namespace(tenant)?)
        .await
        .map_err(ProvisionError::recoverable(steps::BOUNDARY))?;
    let namespace = tenant.namespace_name();
    if outcome == Outcome::Created {
        info!(namespace = %namespace, "created isolation boundary");
    }
    status.namespace = Some(namespace);
    Ok(outcome)
}
