//! Companion control plane for Gold tenants
//!
//! The operator does not install the control plane itself. It publishes a
//! release descriptor ConfigMap for the deployment tooling to act on, then
//! waits a bounded time for the resulting StatefulSet to become ready.

use std::collections::BTreeMap;

use chrono::{SecondsFormat, Utc};
use k8s_openapi::api::apps::v1::StatefulSet;
use k8s_openapi::api::core::v1::ConfigMap;
use kube::runtime::events::EventType;
use kube::{Resource, ResourceExt};
use serde_json::json;
use tenant_common::crd::{Tenant, TenantStatus};
use tenant_common::events::{actions, reasons};
use tenant_common::kube_utils::{owned_meta, poll_until};
use tenant_common::Error;
use tracing::{info, warn};

use super::{converge, steps, Outcome, ProvisionError};
use crate::context::Context;
use crate::objects::{ManagedObject, ObjectKey, ObjectKind};

const CHART_NAME: &str = "vcluster/vcluster";
const CHART_VERSION: &str = "0.15.0";
const IMAGE_REPOSITORY: &str = "loftsh/vcluster";
const PERSISTENCE_SIZE: &str = "10Gi";
const DEPLOYMENT_TIME_KEY: &str = "deployment-time";

/// Release (and StatefulSet) name of the tenant's control plane
pub fn release_name(tenant: &str) -> String {
    format!("{tenant}-vcluster")
}

/// Name of the release descriptor ConfigMap
pub fn release_descriptor_name(tenant: &str) -> String {
    format!("{}-helm-values", release_name(tenant))
}

/// In-cluster URL of the tenant's control plane
pub fn api_endpoint(tenant: &str, namespace: &str) -> String {
    format!("https://{}.{namespace}.svc.cluster.local", release_name(tenant))
}

/// True once every desired replica is ready, and there is at least one
pub fn statefulset_ready(sts: &StatefulSet) -> bool {
    let Some(status) = &sts.status else {
        return false;
    };
    let ready = status.ready_replicas.unwrap_or(0);
    ready >= 1 && ready == status.replicas
}

fn helm_values(tenant: &Tenant) -> Result<String, Error> {
    let cpu = tenant.spec.resources.effective_cpu();
    let memory = tenant.spec.resources.effective_memory();
    let mut values = json!({
        "image": { "repository": IMAGE_REPOSITORY, "tag": CHART_VERSION },
        "replicas": 1,
        "persistence": { "enabled": true, "size": PERSISTENCE_SIZE },
        "resources": {
            "requests": { "cpu": cpu, "memory": memory },
            "limits": { "cpu": cpu, "memory": memory },
        },
    });
    if let Some(class) = &tenant.spec.resources.storage_class {
        values["persistence"]["storageClass"] = json!(class);
    }
    serde_yaml::to_string(&values)
        .map_err(|e| Error::serialization_for_kind("ConfigMap", e.to_string()))
}

/// Desired release descriptor
///
/// `deployed_at` is carried over from the live descriptor so that an
/// unchanged tenant converges to an identical object.
pub(crate) fn desired_release_descriptor(
    tenant: &Tenant,
    deployed_at: Option<String>,
) -> Result<ManagedObject, Error> {
    let name = tenant.name_any();
    let namespace = tenant.namespace_name();
    let mut metadata = owned_meta(tenant, release_descriptor_name(&name), Some(&namespace))?;
    metadata
        .labels
        .get_or_insert_with(BTreeMap::new)
        .insert("app".to_string(), "vcluster".to_string());

    let deployed_at =
        deployed_at.unwrap_or_else(|| Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true));
    let data = BTreeMap::from([
        ("helm-release".to_string(), release_name(&name)),
        ("chart-name".to_string(), CHART_NAME.to_string()),
        ("chart-version".to_string(), CHART_VERSION.to_string()),
        (DEPLOYMENT_TIME_KEY.to_string(), deployed_at),
        ("helm-values".to_string(), helm_values(tenant)?),
    ]);

    Ok(ManagedObject::ConfigMap(ConfigMap {
        metadata,
        data: Some(data),
        ..Default::default()
    }))
}

async fn converge_release_descriptor(ctx: &Context, tenant: &Tenant) -> Result<Outcome, Error> {
    let key = ObjectKey::namespaced(
        ObjectKind::ConfigMap,
        tenant.namespace_name(),
        release_descriptor_name(&tenant.name_any()),
    );
    let deployed_at = match ctx.kube.get_object(&key).await? {
        Some(ManagedObject::ConfigMap(live)) => live
            .data
            .and_then(|mut data| data.remove(DEPLOYMENT_TIME_KEY)),
        _ => None,
    };
    converge(
        ctx.kube.as_ref(),
        desired_release_descriptor(tenant, deployed_at)?,
    )
    .await
}

async fn wait_for_ready(ctx: &Context, namespace: &str, release: &str) -> Result<(), Error> {
    let settings = &ctx.settings;
    poll_until(
        settings.readiness_timeout,
        settings.readiness_poll_interval,
        format!("companion control plane {namespace}/{release} not ready"),
        move || async move {
            Ok(ctx
                .kube
                .get_statefulset(namespace, release)
                .await?
                .is_some_and(|sts| statefulset_ready(&sts)))
        },
    )
    .await
}

/// Publish the release descriptor and wait for the control plane
///
/// A readiness timeout degrades the step instead of failing it; the
/// endpoint is recorded either way and a later pass picks up readiness.
pub async fn ensure_companion_control_plane(
    ctx: &Context,
    tenant: &Tenant,
    status: &mut TenantStatus,
) -> Result<Outcome, ProvisionError> {
    let name = tenant.name_any();
    let namespace = tenant.namespace_name();
    let release = release_name(&name);

    let outcome = converge_release_descriptor(ctx, tenant)
        .await
        .map_err(ProvisionError::recoverable(steps::COMPANION))?;
    status.api_endpoint = Some(api_endpoint(&name, &namespace));

    match wait_for_ready(ctx, &namespace, &release).await {
        Ok(()) => {
            info!(release = %release, "companion control plane ready");
            Ok(outcome)
        }
        Err(e) => {
            warn!(release = %release, error = %e, "companion control plane not ready, continuing");
            ctx.events
                .publish(
                    &tenant.object_ref(&()),
                    EventType::Warning,
                    reasons::COMPANION_NOT_READY,
                    actions::PROVISION,
                    Some(format!("{release} did not become ready in time")),
                )
                .await;
            Ok(outcome.combine(Outcome::Degraded(format!("{release} not ready"))))
        }
    }
}
