//! Resource provisioners
//!
//! Each provisioner is an idempotent ensure: compute the desired object,
//! read the live one, create it if absent, replace it if different and leave
//! it alone otherwise. Running a provisioner twice against an unchanged
//! tenant yields [`Outcome::Unchanged`] the second time.

mod access;
mod boundary;
mod companion;
mod credential;
mod network;
mod propagation;
mod quota;

use std::fmt;

use tenant_common::Error;
use thiserror::Error as ThisError;
use tracing::debug;

use crate::client::KubeClient;
use crate::objects::ManagedObject;

pub use access::{ensure_access_control, role_binding_name, role_name, service_account_name};
pub use boundary::ensure_isolation_boundary;
pub use companion::{
    api_endpoint, ensure_companion_control_plane, release_descriptor_name, release_name,
    statefulset_ready,
};
pub use credential::{
    credential_secret_name, ensure_credential_export, placeholder_kubeconfig,
    source_credential_name,
};
pub use network::{desired_network_policy, ensure_network_isolation, parse_service_ref};
pub use propagation::ensure_secret_propagation;
pub use quota::{ensure_quota, quota_name};

/// Provisioning step names, used in errors and logs
pub mod steps {
    /// Namespace
    pub const BOUNDARY: &str = "namespace";
    /// ResourceQuota
    pub const QUOTA: &str = "quota";
    /// ServiceAccount, Role, RoleBinding
    pub const ACCESS: &str = "rbac";
    /// NetworkPolicy
    pub const NETWORK: &str = "network-policy";
    /// Pull secrets and platform config
    pub const PROPAGATION: &str = "propagation";
    /// Companion control plane
    pub const COMPANION: &str = "companion";
    /// Admin credential export
    pub const CREDENTIAL: &str = "credential";
    /// Tier dispatch
    pub const TIER: &str = "tier";
}

/// What an ensure did
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Outcome {
    /// The object did not exist and was created
    Created,
    /// The object existed with different content and was replaced
    Updated,
    /// The object already matched
    Unchanged,
    /// The step could not complete but provisioning may continue
    Degraded(String),
}

impl Outcome {
    /// Fold the outcomes of several objects into one
    ///
    /// Degraded wins over Created, which wins over Updated, which wins over
    /// Unchanged.
    pub fn combine(self, other: Outcome) -> Outcome {
        use Outcome::*;
        match (self, other) {
            (Degraded(a), Degraded(b)) => Degraded(format!("{a}; {b}")),
            (d @ Degraded(_), _) | (_, d @ Degraded(_)) => d,
            (Created, _) | (_, Created) => Created,
            (Updated, _) | (_, Updated) => Updated,
            (Unchanged, Unchanged) => Unchanged,
        }
    }

    /// True if the step wrote anything
    pub fn changed(&self) -> bool {
        matches!(self, Outcome::Created | Outcome::Updated)
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Created => f.write_str("created"),
            Outcome::Updated => f.write_str("updated"),
            Outcome::Unchanged => f.write_str("unchanged"),
            Outcome::Degraded(reason) => write!(f, "degraded: {reason}"),
        }
    }
}

/// Why a provisioner failed
#[derive(Debug, ThisError)]
pub enum ProvisionError {
    /// A later reconcile may succeed without a spec change
    #[error("{step}: {source}")]
    Recoverable {
        /// Failing step
        step: &'static str,
        /// Underlying error
        #[source]
        source: Error,
    },

    /// Retrying cannot help; the spec must change
    #[error("{step}: {message}")]
    Fatal {
        /// Failing step
        step: &'static str,
        /// Description of what is wrong
        message: String,
    },
}

impl ProvisionError {
    /// Wrap an error from `step`, keeping it recoverable
    pub fn recoverable(step: &'static str) -> impl FnOnce(Error) -> ProvisionError {
        move |source| ProvisionError::Recoverable { step, source }
    }

    /// A failure that needs a spec change
    pub fn fatal(step: &'static str, message: impl Into<String>) -> Self {
        ProvisionError::Fatal {
            step,
            message: message.into(),
        }
    }

    /// Step that failed
    pub fn step(&self) -> &'static str {
        match self {
            ProvisionError::Recoverable { step, .. } | ProvisionError::Fatal { step, .. } => step,
        }
    }

    /// Attach the tenant name and convert to the shared error type
    pub fn into_error(self, tenant: &str) -> Error {
        match self {
            ProvisionError::Recoverable { step, source } => {
                Error::provision(tenant, step, source.to_string())
            }
            ProvisionError::Fatal { step, message } => {
                Error::provision_permanent(tenant, step, message)
            }
        }
    }
}

/// Create, replace or leave `desired` depending on the live object
pub async fn converge(kube: &dyn KubeClient, desired: ManagedObject) -> Result<Outcome, Error> {
    let key = desired.key();
    match kube.get_object(&key).await? {
        None => {
            kube.create_object(&desired).await?;
            debug!(object = %key, "created");
            Ok(Outcome::Created)
        }
        Some(live) => match desired.merged_onto(&live) {
            None => Ok(Outcome::Unchanged),
            Some(updated) => {
                kube.replace_object(&updated).await?;
                debug!(object = %key, "replaced");
                Ok(Outcome::Updated)
            }
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::MockKubeClient;
    use crate::objects::ObjectKind;
    use k8s_openapi::api::core::v1::ConfigMap;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
    use rstest::rstest;
    use std::collections::BTreeMap;

    fn config_map(value: &str) -> ManagedObject {
        ManagedObject::ConfigMap(ConfigMap {
            metadata: ObjectMeta {
                name: Some("cfg".to_string()),
                namespace: Some("tenant-acme".to_string()),
                ..Default::default()
            },
            data: Some(BTreeMap::from([("k".to_string(), value.to_string())])),
            ..Default::default()
        })
    }

    #[rstest]
    #[case(Outcome::Unchanged, Outcome::Unchanged, Outcome::Unchanged)]
    #[case(Outcome::Unchanged, Outcome::Updated, Outcome::Updated)]
    #[case(Outcome::Updated, Outcome::Created, Outcome::Created)]
    #[case(Outcome::Created, Outcome::Degraded("x".into()), Outcome::Degraded("x".into()))]
    #[case(
        Outcome::Degraded("a".into()),
        Outcome::Degraded("b".into()),
        Outcome::Degraded("a; b".into())
    )]
    fn combine_prefers_strongest(#[case] a: Outcome, #[case] b: Outcome, #[case] expected: Outcome) {
        assert_eq!(a.combine(b), expected);
    }

    #[tokio::test]
    async fn converge_creates_missing_object() {
        let mut kube = MockKubeClient::new();
        kube.expect_get_object()
            .withf(|key| key.kind == ObjectKind::ConfigMap && key.name == "cfg")
            .returning(|_| Ok(None));
        kube.expect_create_object().times(1).returning(|_| Ok(()));
        kube.expect_replace_object().never();

        let outcome = converge(&kube, config_map("v1")).await.unwrap();
        assert_eq!(outcome, Outcome::Created);
    }

    #[tokio::test]
    async fn converge_leaves_matching_object() {
        let mut kube = MockKubeClient::new();
        kube.expect_get_object()
            .returning(|_| Ok(Some(config_map("v1"))));
        kube.expect_create_object().never();
        kube.expect_replace_object().never();

        assert_eq!(converge(&kube, config_map("v1")).await.unwrap(), Outcome::Unchanged);
    }

    #[tokio::test]
    async fn converge_replaces_different_object() {
        let mut kube = MockKubeClient::new();
        kube.expect_get_object()
            .returning(|_| Ok(Some(config_map("old"))));
        kube.expect_replace_object()
            .withf(|object| object == &config_map("new"))
            .times(1)
            .returning(|_| Ok(()));

        assert_eq!(converge(&kube, config_map("new")).await.unwrap(), Outcome::Updated);
    }

    #[test]
    fn provision_error_maps_retryability() {
        let err = ProvisionError::recoverable(steps::QUOTA)(Error::internal("timeout"));
        let err = err.into_error("acme");
        assert!(err.is_retryable());
        assert_eq!(err.step(), Some("quota"));

        let err = ProvisionError::fatal(steps::TIER, "unknown tier: Platinum").into_error("acme");
        assert!(!err.is_retryable());
        assert_eq!(err.tenant(), Some("acme"));
    }
}
