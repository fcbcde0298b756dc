//! CRD generation and installation

use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use kube::api::{Patch, PatchParams};
use kube::{Api, Client, CustomResourceExt};
use tenant_common::crd::Tenant;
use tenant_common::CONTROLLER_NAME;

/// Render the Tenant CRD as YAML
pub fn crd_yaml() -> anyhow::Result<String> {
    serde_yaml::to_string(&Tenant::crd())
        .map_err(|e| anyhow::anyhow!("Failed to serialize CRD: {}", e))
}

/// Ensure the Tenant CRD is installed
///
/// Applied with server-side apply on every start so the schema in the
/// cluster always matches the running operator.
pub async fn ensure_crds_installed(client: &Client) -> anyhow::Result<()> {
    let crds: Api<CustomResourceDefinition> = Api::all(client.clone());
    let params = PatchParams::apply(CONTROLLER_NAME).force();

    tracing::info!("Installing Tenant CRD...");
    crds.patch(Tenant::crd_name(), &params, &Patch::Apply(&Tenant::crd()))
        .await
        .map_err(|e| anyhow::anyhow!("Failed to install Tenant CRD: {}", e))?;

    tracing::info!("Tenant CRD installed/updated");
    Ok(())
}
