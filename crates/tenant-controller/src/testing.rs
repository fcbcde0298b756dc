//! In-memory stand-ins for the API server, event recorder and metrics

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::{StatefulSet, StatefulSetStatus};
use k8s_openapi::api::core::v1::{ObjectReference, ResourceQuota, Secret};
use k8s_openapi::api::networking::v1::NetworkPolicy;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, Time};
use k8s_openapi::ByteString;
use kube::runtime::events::EventType;
use kube::ResourceExt;
use serde_json::Value;
use tenant_common::crd::{Tenant, TenantSpec, TenantStatus, TenantTier};
use tenant_common::events::EventPublisher;
use tenant_common::metrics::MetricsSink;
use tenant_common::Error;

use crate::client::KubeClient;
use crate::objects::{ManagedObject, ObjectKey, ObjectKind};

/// A persisted Tenant as admission would have defaulted it
pub fn tenant(name: &str, tier: TenantTier) -> Tenant {
    let mut tenant = Tenant::new(
        name,
        TenantSpec {
            tier: Some(tier),
            owner: "admin@acme.com".to_string(),
            ..Default::default()
        },
    );
    tenant.spec.network.whitelisted_services = Some(vec![]);
    tenant.metadata.uid = Some(format!("uid-{name}"));
    tenant.metadata.generation = Some(1);
    tenant
}

// =============================================================================
// Fake cluster
// =============================================================================

/// API server backed by maps
///
/// Releasing the last finalizer of a deleting Tenant removes it along with
/// every object it owns, as garbage collection would.
#[derive(Default)]
pub struct FakeCluster {
    tenants: Mutex<BTreeMap<String, Tenant>>,
    objects: Mutex<BTreeMap<ObjectKey, ManagedObject>>,
    statefulsets: Mutex<BTreeMap<(String, String), StatefulSet>>,
    fail_kind: Mutex<Option<ObjectKind>>,
    latency: Mutex<Option<Duration>>,
    writes: AtomicUsize,
    active_calls: AtomicUsize,
    max_active_calls: AtomicUsize,
}

struct CallGuard<'a>(&'a AtomicUsize);

impl Drop for CallGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl FakeCluster {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_tenant(&self, tenant: Tenant) {
        self.tenants
            .lock()
            .unwrap()
            .insert(tenant.name_any(), tenant);
    }

    pub fn tenant(&self, name: &str) -> Option<Tenant> {
        self.tenants.lock().unwrap().get(name).cloned()
    }

    /// Edit the spec the way a user would, bumping the generation
    pub fn update_spec(&self, name: &str, edit: impl FnOnce(&mut TenantSpec)) {
        let mut tenants = self.tenants.lock().unwrap();
        let tenant = tenants.get_mut(name).expect("tenant exists");
        edit(&mut tenant.spec);
        tenant.metadata.generation = Some(tenant.metadata.generation.unwrap_or(0) + 1);
    }

    pub fn mark_deleted(&self, name: &str) {
        let mut tenants = self.tenants.lock().unwrap();
        let tenant = tenants.get_mut(name).expect("tenant exists");
        tenant.metadata.deletion_timestamp = Some(Time(chrono::Utc::now()));
    }

    pub fn insert(&self, object: ManagedObject) {
        self.objects.lock().unwrap().insert(object.key(), object);
    }

    pub fn contains(&self, kind: ObjectKind, namespace: Option<&str>, name: &str) -> bool {
        let key = ObjectKey {
            kind,
            namespace: namespace.map(str::to_string),
            name: name.to_string(),
        };
        self.objects.lock().unwrap().contains_key(&key)
    }

    pub fn objects_in(&self, namespace: &str) -> Vec<ManagedObject> {
        self.objects
            .lock()
            .unwrap()
            .iter()
            .filter(|(key, _)| key.namespace.as_deref() == Some(namespace))
            .map(|(_, object)| object.clone())
            .collect()
    }

    fn get(&self, kind: ObjectKind, namespace: &str, name: &str) -> Option<ManagedObject> {
        self.objects
            .lock()
            .unwrap()
            .get(&ObjectKey::namespaced(kind, namespace, name))
            .cloned()
    }

    pub fn network_policy(&self, namespace: &str, name: &str) -> Option<NetworkPolicy> {
        match self.get(ObjectKind::NetworkPolicy, namespace, name)? {
            ManagedObject::NetworkPolicy(policy) => Some(policy),
            _ => None,
        }
    }

    pub fn quota(&self, namespace: &str, name: &str) -> Option<ResourceQuota> {
        match self.get(ObjectKind::ResourceQuota, namespace, name)? {
            ManagedObject::ResourceQuota(quota) => Some(quota),
            _ => None,
        }
    }

    pub fn secret(&self, namespace: &str, name: &str) -> Option<Secret> {
        match self.get(ObjectKind::Secret, namespace, name)? {
            ManagedObject::Secret(secret) => Some(secret),
            _ => None,
        }
    }

    pub fn set_statefulset_ready(&self, namespace: &str, name: &str, replicas: i32) {
        let sts = StatefulSet {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some(namespace.to_string()),
                ..Default::default()
            },
            status: Some(StatefulSetStatus {
                replicas,
                ready_replicas: Some(replicas),
                ..Default::default()
            }),
            ..Default::default()
        };
        self.statefulsets
            .lock()
            .unwrap()
            .insert((namespace.to_string(), name.to_string()), sts);
    }

    pub fn add_source_credential(&self, namespace: &str, name: &str, kubeconfig: &[u8]) {
        self.insert(ManagedObject::Secret(Secret {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some(namespace.to_string()),
                ..Default::default()
            },
            data: Some(BTreeMap::from([(
                "config".to_string(),
                ByteString(kubeconfig.to_vec()),
            )])),
            ..Default::default()
        }));
    }

    /// Make every create of `kind` fail until reset with None
    pub fn fail_creates_of(&self, kind: Option<ObjectKind>) {
        *self.fail_kind.lock().unwrap() = kind;
    }

    pub fn set_latency(&self, latency: Duration) {
        *self.latency.lock().unwrap() = Some(latency);
    }

    /// Creates plus replaces of managed objects so far
    pub fn object_writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    /// Most API calls that were ever in flight at once
    pub fn max_concurrent_calls(&self) -> usize {
        self.max_active_calls.load(Ordering::SeqCst)
    }

    async fn enter(&self) -> CallGuard<'_> {
        let active = self.active_calls.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active_calls.fetch_max(active, Ordering::SeqCst);
        let latency = *self.latency.lock().unwrap();
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        CallGuard(&self.active_calls)
    }

    fn collect_garbage(&self, owner_uid: &str) {
        self.objects.lock().unwrap().retain(|_, object| {
            !object
                .meta()
                .owner_references
                .iter()
                .flatten()
                .any(|owner| owner.uid == owner_uid)
        });
    }
}

#[async_trait]
impl KubeClient for FakeCluster {
    async fn get_tenant(&self, name: &str) -> Result<Option<Tenant>, Error> {
        let _call = self.enter().await;
        Ok(self.tenant(name))
    }

    async fn patch_tenant_status(&self, name: &str, status: &TenantStatus) -> Result<(), Error> {
        let _call = self.enter().await;
        let mut tenants = self.tenants.lock().unwrap();
        let tenant = tenants
            .get_mut(name)
            .ok_or_else(|| Error::internal(format!("tenant {name} not found")))?;
        tenant.status = Some(status.clone());
        Ok(())
    }

    async fn patch_tenant(&self, name: &str, patch: &Value) -> Result<(), Error> {
        let _call = self.enter().await;
        let mut tenants = self.tenants.lock().unwrap();
        let tenant = tenants
            .get_mut(name)
            .ok_or_else(|| Error::internal(format!("tenant {name} not found")))?;
        let mut value = serde_json::to_value(&*tenant)?;
        json_patch::merge(&mut value, patch);
        let mut patched: Tenant = serde_json::from_value(value)?;
        if patched.spec != tenant.spec {
            patched.metadata.generation = Some(tenant.metadata.generation.unwrap_or(0) + 1);
        }
        *tenant = patched;
        Ok(())
    }

    async fn set_finalizers(&self, name: &str, finalizers: &[String]) -> Result<(), Error> {
        let _call = self.enter().await;
        let released_uid = {
            let mut tenants = self.tenants.lock().unwrap();
            let tenant = tenants
                .get_mut(name)
                .ok_or_else(|| Error::internal(format!("tenant {name} not found")))?;
            tenant.metadata.finalizers = Some(finalizers.to_vec());
            if tenant.is_deleting() && finalizers.is_empty() {
                let uid = tenant.metadata.uid.clone().unwrap_or_default();
                tenants.remove(name);
                Some(uid)
            } else {
                None
            }
        };
        if let Some(uid) = released_uid {
            self.collect_garbage(&uid);
        }
        Ok(())
    }

    async fn get_object(&self, key: &ObjectKey) -> Result<Option<ManagedObject>, Error> {
        let _call = self.enter().await;
        Ok(self.objects.lock().unwrap().get(key).cloned())
    }

    async fn create_object(&self, object: &ManagedObject) -> Result<(), Error> {
        let _call = self.enter().await;
        if *self.fail_kind.lock().unwrap() == Some(object.kind()) {
            return Err(Error::internal(format!("injected failure creating {}", object.key())));
        }
        let mut objects = self.objects.lock().unwrap();
        let key = object.key();
        if objects.contains_key(&key) {
            return Err(Error::internal(format!("{key} already exists")));
        }
        objects.insert(key, object.clone());
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn replace_object(&self, object: &ManagedObject) -> Result<(), Error> {
        let _call = self.enter().await;
        let mut objects = self.objects.lock().unwrap();
        let key = object.key();
        if !objects.contains_key(&key) {
            return Err(Error::internal(format!("{key} not found")));
        }
        objects.insert(key, object.clone());
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn list_secrets(&self, namespace: &str) -> Result<Vec<Secret>, Error> {
        let _call = self.enter().await;
        Ok(self
            .objects_in(namespace)
            .into_iter()
            .filter_map(|object| match object {
                ManagedObject::Secret(secret) => Some(secret),
                _ => None,
            })
            .collect())
    }

    async fn get_statefulset(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<StatefulSet>, Error> {
        let _call = self.enter().await;
        Ok(self
            .statefulsets
            .lock()
            .unwrap()
            .get(&(namespace.to_string(), name.to_string()))
            .cloned())
    }
}

// =============================================================================
// Recorders
// =============================================================================

/// Metrics sink that keeps what it was told
#[derive(Default)]
pub struct RecordingMetrics {
    active: Mutex<HashMap<&'static str, i64>>,
    errors: AtomicUsize,
    drift: Mutex<Vec<(String, String)>>,
}

impl RecordingMetrics {
    /// Current active-tenant gauge for a tier label
    pub fn active(&self, tier: &str) -> i64 {
        self.active.lock().unwrap().get(tier).copied().unwrap_or(0)
    }

    pub fn errors(&self) -> usize {
        self.errors.load(Ordering::SeqCst)
    }

    pub fn drift_corrected(&self) -> Vec<(String, String)> {
        self.drift.lock().unwrap().clone()
    }

    fn adjust(&self, tier: &TenantTier, delta: i64) {
        *self
            .active
            .lock()
            .unwrap()
            .entry(tier.metric_label())
            .or_default() += delta;
    }
}

impl MetricsSink for RecordingMetrics {
    fn record_provisioning_duration(&self, _tier: &TenantTier, _seconds: f64) {}

    fn increment_active_tenant(&self, tier: &TenantTier) {
        self.adjust(tier, 1);
    }

    fn decrement_active_tenant(&self, tier: &TenantTier) {
        self.adjust(tier, -1);
    }

    fn increment_reconciliation_error(&self) {
        self.errors.fetch_add(1, Ordering::SeqCst);
    }

    fn record_drift_corrected(&self, tenant: &str, namespace: &str) {
        self.drift
            .lock()
            .unwrap()
            .push((tenant.to_string(), namespace.to_string()));
    }
}

/// Event publisher that keeps reasons in order
#[derive(Default)]
pub struct RecordingEvents {
    published: Mutex<Vec<(String, Option<String>)>>,
}

impl RecordingEvents {
    pub fn reasons(&self) -> Vec<String> {
        self.published
            .lock()
            .unwrap()
            .iter()
            .map(|(reason, _)| reason.clone())
            .collect()
    }
}

#[async_trait]
impl EventPublisher for RecordingEvents {
    async fn publish(
        &self,
        _resource_ref: &ObjectReference,
        _type_: EventType,
        reason: &str,
        _action: &str,
        note: Option<String>,
    ) {
        self.published
            .lock()
            .unwrap()
            .push((reason.to_string(), note));
    }
}
