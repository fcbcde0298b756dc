//! Objects the provisioners manage inside a tenant boundary
//!
//! Every provisioned object is one of a closed set of kinds. Wrapping them in
//! [`ManagedObject`] lets a single create/read/replace path and a single
//! comparison routine serve all provisioners.

use std::collections::BTreeMap;
use std::fmt;

use k8s_openapi::api::core::v1::{
    ConfigMap, Namespace, ResourceQuota, Secret, ServiceAccount,
};
use k8s_openapi::api::networking::v1::NetworkPolicy;
use k8s_openapi::api::rbac::v1::{Role, RoleBinding};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::Resource;

/// Kinds the operator provisions
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ObjectKind {
    /// Tenant isolation boundary (cluster-scoped)
    Namespace,
    /// Compute quota
    ResourceQuota,
    /// Tenant admin identity
    ServiceAccount,
    /// Tenant admin permissions
    Role,
    /// Binds the admin Role to the admin ServiceAccount
    RoleBinding,
    /// Default-deny network isolation
    NetworkPolicy,
    /// Companion release descriptor, propagated config, snapshots
    ConfigMap,
    /// Exported credential, propagated pull secrets
    Secret,
}

impl ObjectKind {
    /// True for the only cluster-scoped kind
    pub fn is_cluster_scoped(&self) -> bool {
        matches!(self, Self::Namespace)
    }
}

impl fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Identity of a managed object
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectKey {
    /// Object kind
    pub kind: ObjectKind,
    /// Namespace, None for cluster-scoped kinds
    pub namespace: Option<String>,
    /// Object name
    pub name: String,
}

impl ObjectKey {
    /// Key of a namespaced object
    pub fn namespaced(kind: ObjectKind, namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            kind,
            namespace: Some(namespace.into()),
            name: name.into(),
        }
    }

    /// Key of a cluster-scoped object
    pub fn cluster(kind: ObjectKind, name: impl Into<String>) -> Self {
        Self {
            kind,
            namespace: None,
            name: name.into(),
        }
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.namespace {
            Some(ns) => write!(f, "{} {}/{}", self.kind, ns, self.name),
            None => write!(f, "{} {}", self.kind, self.name),
        }
    }
}

/// A typed object in one of the managed kinds
#[derive(Clone, Debug, PartialEq)]
pub enum ManagedObject {
    /// Namespace
    Namespace(Namespace),
    /// ResourceQuota
    ResourceQuota(ResourceQuota),
    /// ServiceAccount
    ServiceAccount(ServiceAccount),
    /// Role
    Role(Role),
    /// RoleBinding
    RoleBinding(RoleBinding),
    /// NetworkPolicy
    NetworkPolicy(NetworkPolicy),
    /// ConfigMap
    ConfigMap(ConfigMap),
    /// Secret
    Secret(Secret),
}

macro_rules! each_object {
    ($value:expr, $obj:ident => $body:expr) => {
        match $value {
            ManagedObject::Namespace($obj) => $body,
            ManagedObject::ResourceQuota($obj) => $body,
            ManagedObject::ServiceAccount($obj) => $body,
            ManagedObject::Role($obj) => $body,
            ManagedObject::RoleBinding($obj) => $body,
            ManagedObject::NetworkPolicy($obj) => $body,
            ManagedObject::ConfigMap($obj) => $body,
            ManagedObject::Secret($obj) => $body,
        }
    };
}

impl ManagedObject {
    /// Kind of the wrapped object
    pub fn kind(&self) -> ObjectKind {
        match self {
            Self::Namespace(_) => ObjectKind::Namespace,
            Self::ResourceQuota(_) => ObjectKind::ResourceQuota,
            Self::ServiceAccount(_) => ObjectKind::ServiceAccount,
            Self::Role(_) => ObjectKind::Role,
            Self::RoleBinding(_) => ObjectKind::RoleBinding,
            Self::NetworkPolicy(_) => ObjectKind::NetworkPolicy,
            Self::ConfigMap(_) => ObjectKind::ConfigMap,
            Self::Secret(_) => ObjectKind::Secret,
        }
    }

    /// Object metadata
    pub fn meta(&self) -> &ObjectMeta {
        each_object!(self, o => o.meta())
    }

    /// Mutable object metadata
    pub fn meta_mut(&mut self) -> &mut ObjectMeta {
        each_object!(self, o => o.meta_mut())
    }

    /// Identity derived from kind, namespace and name
    pub fn key(&self) -> ObjectKey {
        let meta = self.meta();
        ObjectKey {
            kind: self.kind(),
            namespace: meta.namespace.clone(),
            name: meta.name.clone().unwrap_or_default(),
        }
    }

    /// Desired state laid over `live`, or None if `live` already converged
    ///
    /// Labels and annotations are merged so keys added by other controllers
    /// survive. Fields the operator does not manage keep their live values.
    pub fn merged_onto(&self, live: &ManagedObject) -> Option<ManagedObject> {
        if metadata_converged(self.meta(), live.meta()) && self.content_matches(live) {
            return None;
        }

        let mut merged = live.clone();
        merged.take_content_from(self);
        merge_metadata(merged.meta_mut(), self.meta());
        Some(merged)
    }

    fn content_matches(&self, live: &ManagedObject) -> bool {
        use ManagedObject as M;
        match (self, live) {
            (M::Namespace(_), M::Namespace(_)) => true,
            (M::ServiceAccount(_), M::ServiceAccount(_)) => true,
            (M::ResourceQuota(want), M::ResourceQuota(have)) => {
                let hard = |q: &ResourceQuota| q.spec.as_ref().and_then(|s| s.hard.clone());
                quota_hard_equal(hard(want).as_ref(), hard(have).as_ref())
            }
            (M::Role(want), M::Role(have)) => want.rules == have.rules,
            (M::RoleBinding(want), M::RoleBinding(have)) => {
                want.role_ref == have.role_ref && want.subjects == have.subjects
            }
            (M::NetworkPolicy(want), M::NetworkPolicy(have)) => want.spec == have.spec,
            (M::ConfigMap(want), M::ConfigMap(have)) => {
                want.data == have.data && want.binary_data == have.binary_data
            }
            (M::Secret(want), M::Secret(have)) => {
                want.data == have.data && want.type_ == have.type_
            }
            _ => false,
        }
    }

    fn take_content_from(&mut self, desired: &ManagedObject) {
        use ManagedObject as M;
        match (self, desired) {
            (M::ResourceQuota(live), M::ResourceQuota(want)) => live.spec = want.spec.clone(),
            (M::Role(live), M::Role(want)) => live.rules = want.rules.clone(),
            (M::RoleBinding(live), M::RoleBinding(want)) => {
                live.role_ref = want.role_ref.clone();
                live.subjects = want.subjects.clone();
            }
            (M::NetworkPolicy(live), M::NetworkPolicy(want)) => live.spec = want.spec.clone(),
            (M::ConfigMap(live), M::ConfigMap(want)) => {
                live.data = want.data.clone();
                live.binary_data = want.binary_data.clone();
            }
            (M::Secret(live), M::Secret(want)) => {
                live.data = want.data.clone();
                live.type_ = want.type_.clone();
            }
            _ => {}
        }
    }
}

fn is_subset(want: Option<&BTreeMap<String, String>>, have: Option<&BTreeMap<String, String>>) -> bool {
    let Some(want) = want else { return true };
    let empty = BTreeMap::new();
    let have = have.unwrap_or(&empty);
    want.iter().all(|(k, v)| have.get(k) == Some(v))
}

fn metadata_converged(want: &ObjectMeta, have: &ObjectMeta) -> bool {
    let owners_present = want.owner_references.iter().flatten().all(|owner| {
        have.owner_references
            .iter()
            .flatten()
            .any(|live| live.uid == owner.uid)
    });
    owners_present
        && is_subset(want.labels.as_ref(), have.labels.as_ref())
        && is_subset(want.annotations.as_ref(), have.annotations.as_ref())
}

fn merge_metadata(live: &mut ObjectMeta, want: &ObjectMeta) {
    if let Some(labels) = &want.labels {
        live.labels.get_or_insert_with(BTreeMap::new).extend(labels.clone());
    }
    if let Some(annotations) = &want.annotations {
        live.annotations
            .get_or_insert_with(BTreeMap::new)
            .extend(annotations.clone());
    }
    for owner in want.owner_references.iter().flatten() {
        let owners = live.owner_references.get_or_insert_with(Vec::new);
        if !owners.iter().any(|o| o.uid == owner.uid) {
            owners.push(owner.clone());
        }
    }
}

// =============================================================================
// Quantities
// =============================================================================

// The apiserver returns quantities in canonical form ("1000m" comes back as
// "1"), so quota limits are compared by value.
fn quota_hard_equal(
    want: Option<&BTreeMap<String, Quantity>>,
    have: Option<&BTreeMap<String, Quantity>>,
) -> bool {
    let empty = BTreeMap::new();
    let (want, have) = (want.unwrap_or(&empty), have.unwrap_or(&empty));
    want.len() == have.len()
        && want.iter().all(|(resource, q)| {
            have.get(resource)
                .is_some_and(|live| quantities_equal(&q.0, &live.0))
        })
}

fn quantities_equal(a: &str, b: &str) -> bool {
    match (quantity_value(a), quantity_value(b)) {
        (Some(x), Some(y)) => (x - y).abs() <= f64::EPSILON * x.abs().max(y.abs()).max(1.0),
        _ => a == b,
    }
}

fn quantity_value(raw: &str) -> Option<f64> {
    const SUFFIXES: [(&str, f64); 13] = [
        ("Ki", 1024.0),
        ("Mi", 1_048_576.0),
        ("Gi", 1_073_741_824.0),
        ("Ti", 1_099_511_627_776.0),
        ("Pi", 1_125_899_906_842_624.0),
        ("Ei", 1_152_921_504_606_846_976.0),
        ("m", 1e-3),
        ("k", 1e3),
        ("M", 1e6),
        ("G", 1e9),
        ("T", 1e12),
        ("P", 1e15),
        ("E", 1e18),
    ];
    let raw = raw.trim();
    let (number, scale) = SUFFIXES
        .iter()
        .find_map(|(suffix, scale)| raw.strip_suffix(suffix).map(|n| (n, *scale)))
        .unwrap_or((raw, 1.0));
    number.parse::<f64>().ok().map(|n| n * scale)
}
