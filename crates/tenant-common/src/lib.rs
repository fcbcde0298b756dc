//! Common types for the tenant operator: CRDs, errors, and utilities

#![deny(missing_docs)]

pub mod crd;
pub mod error;
pub mod events;
pub mod kube_utils;
pub mod metrics;
pub mod telemetry;

pub use error::Error;

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Default namespace for operator-owned resources (snapshots, propagation sources)
pub const OPERATOR_NAMESPACE: &str = "tenant-operator-system";

/// Name used as field manager and event reporting component
pub const CONTROLLER_NAME: &str = "tenant-operator";

/// Finalizer that defers cascade deletion until tenant cleanup has run
pub const TENANT_FINALIZER: &str = "tenant.platform.io/finalizer";

/// Prefix of every tenant isolation boundary (namespace) name
pub const NAMESPACE_PREFIX: &str = "tenant";

/// Label carrying the tenant name
pub const LABEL_TENANT_NAME: &str = "tenant.platform.io/name";

/// Label carrying the tenant tier
pub const LABEL_TENANT_TIER: &str = "tenant.platform.io/tier";

/// Label carrying the sanitized tenant owner
pub const LABEL_TENANT_OWNER: &str = "tenant.platform.io/owner";

/// Standard Kubernetes managed-by label
pub const LABEL_MANAGED_BY: &str = "app.kubernetes.io/managed-by";

/// Value of the managed-by label for objects created by this operator
pub const LABEL_MANAGED_BY_OPERATOR: &str = "tenant-operator";

/// Annotation marking a credential as a non-functional placeholder
pub const ANNOTATION_PLACEHOLDER: &str = "tenant.platform.io/placeholder";

/// Annotation recording the tier applied by the last successful reconcile
pub const ANNOTATION_LAST_TIER: &str = "tenant.platform.io/last-tier";

/// Name of the default-deny NetworkPolicy in every tenant namespace
pub const NETWORK_POLICY_NAME: &str = "default-deny-all";

/// Suffix of the exported admin credential Secret
pub const KUBECONFIG_SECRET_SUFFIX: &str = "kubeconfig";

/// Key under which the exported credential is stored
pub const KUBECONFIG_KEY: &str = "kubeconfig";

/// Name of the platform ConfigMap propagated into every tenant namespace
pub const PLATFORM_CONFIG_NAME: &str = "platform-config";

/// Pod count cap applied by every tenant quota
pub const QUOTA_MAX_PODS: &str = "100";

/// Derive the isolation boundary name for a tenant
pub fn tenant_namespace(tenant_name: &str) -> String {
    format!("{}-{}", NAMESPACE_PREFIX, tenant_name)
}

/// Longest value Kubernetes accepts for a label
pub const LABEL_VALUE_MAX_LEN: usize = 63;

/// Turn an owner address into a valid label value
///
/// The display-name form keeps only the address, `@` becomes `_at_` and any
/// other character outside `[A-Za-z0-9._-]` becomes `_`. The result is cut
/// to 63 characters and trimmed so it starts and ends alphanumeric; it may
/// be empty.
pub fn owner_label_value(owner: &str) -> String {
    let address = match (owner.rfind('<'), owner.rfind('>')) {
        (Some(open), Some(close)) if open < close => &owner[open + 1..close],
        _ => owner,
    };
    let sanitized: String = address
        .trim()
        .replace('@', "_at_")
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '_'
            }
        })
        .take(LABEL_VALUE_MAX_LEN)
        .collect();
    sanitized
        .trim_matches(|c: char| !c.is_ascii_alphanumeric())
        .to_string()
}
