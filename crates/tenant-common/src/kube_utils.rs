//! Kubernetes helpers shared by the admission gate, controller and binary

use std::collections::BTreeMap;
use std::future::Future;
use std::path::Path;
use std::time::Duration;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Client, Config, Resource, ResourceExt};
use tracing::trace;

use crate::crd::Tenant;
use crate::Error;

/// Default connection timeout for kube clients
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
/// Default read timeout for kube clients; bounds every API call a reconcile makes
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(30);

/// Poll `check_fn` every `poll_interval` until it returns `Ok(true)` or
/// `timeout` elapses.
///
/// Errors from `check_fn` are treated as "not yet" and polling continues.
/// On timeout returns `Error::Internal` with `timeout_msg`.
pub async fn poll_until<F, Fut>(
    timeout: Duration,
    poll_interval: Duration,
    timeout_msg: impl Into<String>,
    mut check_fn: F,
) -> Result<(), Error>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<bool, Error>>,
{
    let start = tokio::time::Instant::now();
    let timeout_msg = timeout_msg.into();

    loop {
        match check_fn().await {
            Ok(true) => return Ok(()),
            Ok(false) => trace!("Polling condition not yet met, retrying..."),
            Err(e) => trace!("Polling check returned error (retrying): {}", e),
        }

        if start.elapsed() + poll_interval > timeout {
            return Err(Error::internal_with_context("poll_until", timeout_msg));
        }

        tokio::time::sleep(poll_interval).await;
    }
}

/// Create a kube client from an optional kubeconfig path with default timeouts
pub async fn create_client(kubeconfig: Option<&Path>) -> Result<Client, Error> {
    let mut config = match kubeconfig {
        Some(path) => {
            let kubeconfig = Kubeconfig::read_from(path).map_err(|e| {
                Error::internal_with_context(
                    "create_client",
                    format!("failed to read kubeconfig: {}", e),
                )
            })?;
            Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
                .await
                .map_err(|e| {
                    Error::internal_with_context(
                        "create_client",
                        format!("failed to load kubeconfig: {}", e),
                    )
                })?
        }
        None => Config::infer().await.map_err(|e| {
            Error::internal_with_context("create_client", format!("failed to infer config: {}", e))
        })?,
    };
    config.connect_timeout = Some(DEFAULT_CONNECT_TIMEOUT);
    config.read_timeout = Some(DEFAULT_READ_TIMEOUT);
    Client::try_from(config).map_err(|e| {
        Error::internal_with_context("create_client", format!("failed to create client: {}", e))
    })
}

/// Controller owner reference pointing at `tenant`
///
/// Fails only if the Tenant has no name or uid, i.e. was never persisted.
pub fn tenant_owner_reference(tenant: &Tenant) -> Result<OwnerReference, Error> {
    tenant.controller_owner_ref(&()).ok_or_else(|| {
        Error::internal_with_context(
            "owner_reference",
            format!("tenant {} has no uid", tenant.name_any()),
        )
    })
}

/// Labels stamped on every object provisioned for `tenant`
pub fn tenant_labels(tenant: &Tenant) -> BTreeMap<String, String> {
    let mut labels = BTreeMap::from([
        (crate::LABEL_TENANT_NAME.to_string(), tenant.name_any()),
        (
            crate::LABEL_MANAGED_BY.to_string(),
            crate::LABEL_MANAGED_BY_OPERATOR.to_string(),
        ),
    ]);
    if let Some(tier) = &tenant.spec.tier {
        labels.insert(crate::LABEL_TENANT_TIER.to_string(), tier.to_string());
    }
    let owner = crate::owner_label_value(&tenant.spec.owner);
    if !owner.is_empty() {
        labels.insert(crate::LABEL_TENANT_OWNER.to_string(), owner);
    }
    labels
}

/// Metadata for an object owned by `tenant`
///
/// `namespace` is None for cluster-scoped objects such as the tenant Namespace.
pub fn owned_meta(
    tenant: &Tenant,
    name: impl Into<String>,
    namespace: Option<&str>,
) -> Result<ObjectMeta, Error> {
    Ok(ObjectMeta {
        name: Some(name.into()),
        namespace: namespace.map(str::to_string),
        labels: Some(tenant_labels(tenant)),
        owner_references: Some(vec![tenant_owner_reference(tenant)?]),
        ..Default::default()
    })
}
