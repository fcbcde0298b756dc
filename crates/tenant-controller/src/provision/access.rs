//! Namespace-scoped access control: ServiceAccount, Role and RoleBinding

use k8s_openapi::api::core::v1::ServiceAccount;
use k8s_openapi::api::rbac::v1::{PolicyRule, Role, RoleBinding, RoleRef, Subject};
use kube::ResourceExt;
use tenant_common::crd::Tenant;
use tenant_common::kube_utils::owned_meta;

use super::{converge, steps, Outcome, ProvisionError};
use crate::context::Context;
use crate::objects::ManagedObject;

const RBAC_API_GROUP: &str = "rbac.authorization.k8s.io";

/// Name of the tenant admin ServiceAccount
pub fn service_account_name(tenant: &str) -> String {
    format!("{tenant}-sa")
}

/// Name of the tenant admin Role
pub fn role_name(tenant: &str) -> String {
    format!("{tenant}-admin")
}

/// Name of the RoleBinding granting the Role to the ServiceAccount
pub fn role_binding_name(tenant: &str) -> String {
    format!("{tenant}-admin-binding")
}

/// Desired ServiceAccount, Role and RoleBinding, in creation order
pub(crate) fn desired_access_objects(tenant: &Tenant) -> Result<Vec<ManagedObject>, ProvisionError> {
    let name = tenant.name_any();
    let namespace = tenant.namespace_name();
    let meta = |object_name: String| {
        owned_meta(tenant, object_name, Some(&namespace))
            .map_err(ProvisionError::recoverable(steps::ACCESS))
    };

    let service_account = ServiceAccount {
        metadata: meta(service_account_name(&name))?,
        ..Default::default()
    };

    // Full control, but only inside the tenant namespace
    let role = Role {
        metadata: meta(role_name(&name))?,
        rules: Some(vec![PolicyRule {
            api_groups: Some(vec!["*".to_string()]),
            resources: Some(vec!["*".to_string()]),
            verbs: vec!["*".to_string()],
            ..Default::default()
        }]),
    };

    let binding = RoleBinding {
        metadata: meta(role_binding_name(&name))?,
        role_ref: RoleRef {
            api_group: RBAC_API_GROUP.to_string(),
            kind: "Role".to_string(),
            name: role_name(&name),
        },
        subjects: Some(vec![Subject {
            kind: "ServiceAccount".to_string(),
            name: service_account_name(&name),
            namespace: Some(namespace.clone()),
            ..Default::default()
        }]),
    };

    Ok(vec![
        ManagedObject::ServiceAccount(service_account),
        ManagedObject::Role(role),
        ManagedObject::RoleBinding(binding),
    ])
}

/// Ensure the tenant admin identity and its namespace-wide grant
pub async fn ensure_access_control(
    ctx: &Context,
    tenant: &Tenant,
) -> Result<Outcome, ProvisionError> {
    let mut outcome = Outcome::Unchanged;
    for object in desired_access_objects(tenant)? {
        let step = converge(ctx.kube.as_ref(), object)
            .await
            .map_err(ProvisionError::recoverable(steps::ACCESS))?;
        outcome = outcome.combine(step);
    }
    Ok(outcome)
}
