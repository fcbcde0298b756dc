//! Copies of operator-wide pull secrets and platform config
//!
//! Nothing here can fail a reconcile. Every error degrades the step and is
//! surfaced as a `PropagationSkipped` event.

use k8s_openapi::api::core::v1::{ConfigMap, Secret};
use kube::runtime::events::EventType;
use kube::{Resource, ResourceExt};
use tenant_common::crd::Tenant;
use tenant_common::events::{actions, reasons};
use tenant_common::kube_utils::owned_meta;
use tenant_common::{Error, PLATFORM_CONFIG_NAME};
use tracing::{debug, warn};

use super::{converge, Outcome, ProvisionError};
use crate::context::Context;
use crate::objects::{ManagedObject, ObjectKey, ObjectKind};

const PULL_SECRET_TYPES: [&str; 2] = ["kubernetes.io/dockercfg", "kubernetes.io/dockerconfigjson"];

fn is_pull_secret(secret: &Secret) -> bool {
    secret
        .type_
        .as_deref()
        .is_some_and(|t| PULL_SECRET_TYPES.contains(&t))
}

/// Tenant-owned copy of an operator namespace Secret
pub(crate) fn secret_copy(tenant: &Tenant, source: &Secret) -> Result<ManagedObject, Error> {
    let namespace = tenant.namespace_name();
    Ok(ManagedObject::Secret(Secret {
        metadata: owned_meta(tenant, source.name_any(), Some(&namespace))?,
        type_: source.type_.clone(),
        data: source.data.clone(),
        ..Default::default()
    }))
}

/// Tenant-owned copy of an operator namespace ConfigMap
pub(crate) fn config_map_copy(tenant: &Tenant, source: &ConfigMap) -> Result<ManagedObject, Error> {
    let namespace = tenant.namespace_name();
    Ok(ManagedObject::ConfigMap(ConfigMap {
        metadata: owned_meta(tenant, source.name_any(), Some(&namespace))?,
        data: source.data.clone(),
        binary_data: source.binary_data.clone(),
        ..Default::default()
    }))
}

async fn propagate_pull_secrets(ctx: &Context, tenant: &Tenant, failures: &mut Vec<String>) -> Outcome {
    let source_namespace = &ctx.settings.operator_namespace;
    let secrets = match ctx.kube.list_secrets(source_namespace).await {
        Ok(secrets) => secrets,
        Err(e) => {
            failures.push(format!("list secrets in {source_namespace}: {e}"));
            return Outcome::Unchanged;
        }
    };

    let mut outcome = Outcome::Unchanged;
    for secret in secrets.iter().filter(|s| is_pull_secret(s)) {
        let name = secret.name_any();
        let result = match secret_copy(tenant, secret) {
            Ok(copy) => converge(ctx.kube.as_ref(), copy).await,
            Err(e) => Err(e),
        };
        match result {
            Ok(step) => {
                debug!(secret = %name, outcome = %step, "propagated pull secret");
                outcome = outcome.combine(step);
            }
            Err(e) => failures.push(format!("secret {name}: {e}")),
        }
    }
    outcome
}

async fn propagate_platform_config(
    ctx: &Context,
    tenant: &Tenant,
    failures: &mut Vec<String>,
) -> Outcome {
    let key = ObjectKey::namespaced(
        ObjectKind::ConfigMap,
        ctx.settings.operator_namespace.clone(),
        PLATFORM_CONFIG_NAME,
    );
    let source = match ctx.kube.get_object(&key).await {
        Ok(Some(ManagedObject::ConfigMap(cm))) => cm,
        Ok(_) => {
            debug!(configmap = %key, "platform config not found, skipping");
            return Outcome::Unchanged;
        }
        Err(e) => {
            failures.push(format!("read {key}: {e}"));
            return Outcome::Unchanged;
        }
    };

    let result = match config_map_copy(tenant, &source) {
        Ok(copy) => converge(ctx.kube.as_ref(), copy).await,
        Err(e) => Err(e),
    };
    result.unwrap_or_else(|e| {
        failures.push(format!("configmap {PLATFORM_CONFIG_NAME}: {e}"));
        Outcome::Unchanged
    })
}

/// Copy pull secrets and the platform ConfigMap into the tenant namespace
pub async fn ensure_secret_propagation(
    ctx: &Context,
    tenant: &Tenant,
) -> Result<Outcome, ProvisionError> {
    let mut failures = Vec::new();
    let outcome = propagate_pull_secrets(ctx, tenant, &mut failures)
        .await
        .combine(propagate_platform_config(ctx, tenant, &mut failures).await);

    if failures.is_empty() {
        return Ok(outcome);
    }

    let reason = failures.join("; ");
    warn!(error = %reason, "propagation incomplete");
    ctx.events
        .publish(
            &tenant.object_ref(&()),
            EventType::Warning,
            reasons::PROPAGATION_SKIPPED,
            actions::PROVISION,
            Some(reason.clone()),
        )
        .await;
    Ok(outcome.combine(Outcome::Degraded(reason)))
}
