//! Admin credential export for Gold tenants

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::ByteString;
use kube::runtime::events::EventType;
use kube::{Resource, ResourceExt};
use tenant_common::crd::{Tenant, TenantStatus};
use tenant_common::events::{actions, reasons};
use tenant_common::kube_utils::owned_meta;
use tenant_common::{Error, ANNOTATION_PLACEHOLDER, KUBECONFIG_KEY, KUBECONFIG_SECRET_SUFFIX};
use tracing::{info, warn};

use super::companion::release_name;
use super::{converge, steps, Outcome, ProvisionError};
use crate::context::Context;
use crate::objects::{ManagedObject, ObjectKey, ObjectKind};

const SOURCE_KEY: &str = "config";
const API_PORT: u16 = 6443;

/// Secret the companion control plane writes its admin kubeconfig to
pub fn source_credential_name(tenant: &str) -> String {
    format!("vc-{}", release_name(tenant))
}

/// Secret the operator exports the admin kubeconfig as
pub fn credential_secret_name(tenant: &str) -> String {
    format!("{tenant}-{KUBECONFIG_SECRET_SUFFIX}")
}

/// Structurally valid kubeconfig that cannot authenticate
///
/// Stands in for the real credential until the control plane publishes one.
pub fn placeholder_kubeconfig(tenant: &str, namespace: &str) -> String {
    let release = release_name(tenant);
    format!(
        r#"apiVersion: v1
kind: Config
clusters:
- cluster:
    insecure-skip-tls-verify: true
    server: https://{release}.{namespace}.svc.cluster.local:{API_PORT}
  name: {release}
contexts:
- context:
    cluster: {release}
    user: admin-{tenant}
  name: {release}
current-context: {release}
preferences: {{}}
users:
- name: admin-{tenant}
  user:
    token: placeholder
"#
    )
}

/// Desired exported Secret given the source kubeconfig, if any
pub(crate) fn desired_credential_secret(
    tenant: &Tenant,
    source: Option<ByteString>,
) -> Result<ManagedObject, Error> {
    let name = tenant.name_any();
    let namespace = tenant.namespace_name();
    let placeholder = source.is_none();
    let kubeconfig = source
        .unwrap_or_else(|| ByteString(placeholder_kubeconfig(&name, &namespace).into_bytes()));

    let mut metadata = owned_meta(tenant, credential_secret_name(&name), Some(&namespace))?;
    metadata.annotations = Some(BTreeMap::from([(
        ANNOTATION_PLACEHOLDER.to_string(),
        placeholder.to_string(),
    )]));

    Ok(ManagedObject::Secret(Secret {
        metadata,
        type_: Some("Opaque".to_string()),
        data: Some(BTreeMap::from([(KUBECONFIG_KEY.to_string(), kubeconfig)])),
        ..Default::default()
    }))
}

async fn read_source(ctx: &Context, tenant: &Tenant) -> Result<Option<ByteString>, Error> {
    let key = ObjectKey::namespaced(
        ObjectKind::Secret,
        tenant.namespace_name(),
        source_credential_name(&tenant.name_any()),
    );
    Ok(match ctx.kube.get_object(&key).await? {
        Some(ManagedObject::Secret(secret)) => {
            secret.data.and_then(|mut data| data.remove(SOURCE_KEY))
        }
        _ => None,
    })
}

/// Republish the admin kubeconfig inside the tenant namespace
///
/// Falls back to a placeholder annotated `tenant.platform.io/placeholder=true`
/// so status can always name the credential Secret.
pub async fn ensure_credential_export(
    ctx: &Context,
    tenant: &Tenant,
    status: &mut TenantStatus,
) -> Result<Outcome, ProvisionError> {
    let name = tenant.name_any();
    let source = read_source(ctx, tenant)
        .await
        .map_err(ProvisionError::recoverable(steps::CREDENTIAL))?;
    let placeholder = source.is_none();

    let desired = desired_credential_secret(tenant, source)
        .map_err(ProvisionError::recoverable(steps::CREDENTIAL))?;
    let outcome = converge(ctx.kube.as_ref(), desired)
        .await
        .map_err(ProvisionError::recoverable(steps::CREDENTIAL))?;

    let secret = credential_secret_name(&name);
    if placeholder && outcome.changed() {
        warn!(secret = %secret, "source credential not available, exported placeholder");
        ctx.events
            .publish(
                &tenant.object_ref(&()),
                EventType::Warning,
                reasons::PLACEHOLDER_CREDENTIAL,
                actions::PROVISION,
                Some(format!("{secret} holds a placeholder kubeconfig")),
            )
            .await;
    } else if outcome.changed() {
        info!(secret = %secret, "exported admin credential");
    }
    status.admin_credential_ref = Some(secret);
    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::tenant;
    use tenant_common::crd::TenantTier;

    fn secret_parts(object: ManagedObject) -> (BTreeMap<String, String>, String) {
        let secret = match object {
            ManagedObject::Secret(secret) => secret,
            other => panic!("expected secret, got {}", other.kind()),
        };
        let kubeconfig = secret.data.unwrap().remove("kubeconfig").unwrap();
        (
            secret.metadata.annotations.unwrap(),
            String::from_utf8(kubeconfig.0).unwrap(),
        )
    }

    #[test]
    fn names_follow_release() {
        assert_eq!(source_credential_name("acme"), "vc-acme-vcluster");
        assert_eq!(credential_secret_name("acme"), "acme-kubeconfig");
    }

    #[test]
    fn missing_source_exports_annotated_placeholder() {
        let t = tenant("acme", TenantTier::Gold);
        let (annotations, kubeconfig) = secret_parts(desired_credential_secret(&t, None).unwrap());
        assert_eq!(annotations[ANNOTATION_PLACEHOLDER], "true");
        assert!(kubeconfig.contains("server: https://acme-vcluster.tenant-acme.svc.cluster.local:6443"));
        let parsed: serde_yaml::Value = serde_yaml::from_str(&kubeconfig).unwrap();
        assert_eq!(parsed["kind"], "Config");
    }

    #[test]
    fn real_source_is_copied_verbatim() {
        let t = tenant("acme", TenantTier::Gold);
        let source = ByteString(b"apiVersion: v1\nkind: Config\n".to_vec());
        let (annotations, kubeconfig) =
            secret_parts(desired_credential_secret(&t, Some(source)).unwrap());
        assert_eq!(annotations[ANNOTATION_PLACEHOLDER], "false");
        assert_eq!(kubeconfig, "apiVersion: v1\nkind: Config\n");
    }

    #[test]
    fn real_credential_replaces_placeholder() {
        let t = tenant("acme", TenantTier::Gold);
        let live = desired_credential_secret(&t, None).unwrap();
        let real = desired_credential_secret(&t, Some(ByteString(b"real".to_vec()))).unwrap();

        let merged = real.merged_onto(&live).expect("placeholder is replaced");
        assert_eq!(merged.meta().annotations.as_ref().unwrap()[ANNOTATION_PLACEHOLDER], "false");
    }
}
