//! Kubernetes access for the tenant controller
//!
//! Everything the reconciler, provisioners and drift detector read or write
//! goes through [`KubeClient`], so tests can substitute a mock or an
//! in-memory cluster.

use std::fmt::Debug;

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::StatefulSet;
use k8s_openapi::api::core::v1::{
    ConfigMap, Namespace, ResourceQuota, Secret, ServiceAccount,
};
use k8s_openapi::api::networking::v1::NetworkPolicy;
use k8s_openapi::api::rbac::v1::{Role, RoleBinding};
use k8s_openapi::NamespaceResourceScope;
use kube::api::{Api, Patch, PatchParams, PostParams};
use kube::{Client, Resource};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Map, Value};
use tenant_common::crd::{Tenant, TenantStatus};
use tenant_common::{Error, CONTROLLER_NAME};
use tracing::debug;

#[cfg(test)]
use mockall::automock;

use crate::objects::{ManagedObject, ObjectKey, ObjectKind};

/// Trait abstracting Kubernetes client operations for Tenant reconciliation
///
/// This trait allows mocking the Kubernetes client in tests while using
/// the real client in production.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait KubeClient: Send + Sync {
    /// Get a Tenant by name
    async fn get_tenant(&self, name: &str) -> Result<Option<Tenant>, Error>;

    /// Write the full status of a Tenant
    ///
    /// Fields absent from `status` are cleared.
    async fn patch_tenant_status(&self, name: &str, status: &TenantStatus) -> Result<(), Error>;

    /// Merge-patch the Tenant object itself (metadata and spec)
    async fn patch_tenant(&self, name: &str, patch: &Value) -> Result<(), Error>;

    /// Replace the finalizer list of a Tenant
    async fn set_finalizers(&self, name: &str, finalizers: &[String]) -> Result<(), Error>;

    /// Read a managed object; None if it does not exist
    async fn get_object(&self, key: &ObjectKey) -> Result<Option<ManagedObject>, Error>;

    /// Create a managed object
    async fn create_object(&self, object: &ManagedObject) -> Result<(), Error>;

    /// Replace a managed object; `object` carries the live resourceVersion
    async fn replace_object(&self, object: &ManagedObject) -> Result<(), Error>;

    /// List every Secret in a namespace
    async fn list_secrets(&self, namespace: &str) -> Result<Vec<Secret>, Error>;

    /// Get a StatefulSet by namespace and name
    async fn get_statefulset(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<StatefulSet>, Error>;
}

/// Merge patch body for a full status write
///
/// A merge patch leaves keys it does not mention untouched, so every status
/// field that is unset is sent as an explicit null.
pub fn status_merge_patch(status: &TenantStatus) -> Result<Value, Error> {
    const FIELDS: [&str; 8] = [
        "state",
        "namespace",
        "apiEndpoint",
        "adminCredentialRef",
        "provisioningStartTime",
        "lastUpdateTime",
        "lastError",
        "observedGeneration",
    ];
    let mut body = match serde_json::to_value(status)? {
        Value::Object(map) => map,
        _ => Map::new(),
    };
    for field in FIELDS {
        body.entry(field).or_insert(Value::Null);
    }
    Ok(json!({ "status": body }))
}

/// Real Kubernetes client implementation
pub struct KubeClientImpl {
    client: Client,
}

impl KubeClientImpl {
    /// Create a new KubeClientImpl wrapping the given client
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn namespaced<K>(&self, namespace: Option<&str>) -> Result<Api<K>, Error>
    where
        K: Resource<Scope = NamespaceResourceScope, DynamicType = ()>,
    {
        let namespace = namespace.ok_or_else(|| {
            Error::internal_with_context("kube_client", "namespaced object without namespace")
        })?;
        Ok(Api::namespaced(self.client.clone(), namespace))
    }

    async fn get_namespaced<K>(&self, key: &ObjectKey) -> Result<Option<K>, Error>
    where
        K: Resource<Scope = NamespaceResourceScope, DynamicType = ()>
            + Clone
            + Debug
            + DeserializeOwned,
    {
        let api: Api<K> = self.namespaced(key.namespace.as_deref())?;
        Ok(api.get_opt(&key.name).await?)
    }

    async fn create_namespaced<K>(&self, object: &K) -> Result<(), Error>
    where
        K: Resource<Scope = NamespaceResourceScope, DynamicType = ()>
            + Clone
            + Debug
            + Serialize
            + DeserializeOwned,
    {
        let api: Api<K> = self.namespaced(object.meta().namespace.as_deref())?;
        api.create(&PostParams::default(), object).await?;
        Ok(())
    }

    async fn replace_namespaced<K>(&self, object: &K) -> Result<(), Error>
    where
        K: Resource<Scope = NamespaceResourceScope, DynamicType = ()>
            + Clone
            + Debug
            + Serialize
            + DeserializeOwned,
    {
        let api: Api<K> = self.namespaced(object.meta().namespace.as_deref())?;
        let name = object.meta().name.clone().unwrap_or_default();
        api.replace(&name, &PostParams::default(), object).await?;
        Ok(())
    }
}

#[async_trait]
impl KubeClient for KubeClientImpl {
    async fn get_tenant(&self, name: &str) -> Result<Option<Tenant>, Error> {
        let api: Api<Tenant> = Api::all(self.client.clone());
        Ok(api.get_opt(name).await?)
    }

    async fn patch_tenant_status(&self, name: &str, status: &TenantStatus) -> Result<(), Error> {
        let api: Api<Tenant> = Api::all(self.client.clone());
        let patch = status_merge_patch(status)?;
        api.patch_status(name, &PatchParams::default(), &Patch::Merge(&patch))
            .await?;
        debug!(tenant = %name, state = ?status.state, "patched tenant status");
        Ok(())
    }

    async fn patch_tenant(&self, name: &str, patch: &Value) -> Result<(), Error> {
        let api: Api<Tenant> = Api::all(self.client.clone());
        api.patch(name, &PatchParams::default(), &Patch::Merge(patch))
            .await?;
        Ok(())
    }

    async fn set_finalizers(&self, name: &str, finalizers: &[String]) -> Result<(), Error> {
        let api: Api<Tenant> = Api::all(self.client.clone());
        let patch = json!({ "metadata": { "finalizers": finalizers } });
        let params = PatchParams {
            field_manager: Some(CONTROLLER_NAME.to_string()),
            ..Default::default()
        };
        api.patch(name, &params, &Patch::Merge(&patch)).await?;
        Ok(())
    }

    async fn get_object(&self, key: &ObjectKey) -> Result<Option<ManagedObject>, Error> {
        let object = match key.kind {
            ObjectKind::Namespace => Api::<Namespace>::all(self.client.clone())
                .get_opt(&key.name)
                .await?
                .map(ManagedObject::Namespace),
            ObjectKind::ResourceQuota => self
                .get_namespaced::<ResourceQuota>(key)
                .await?
                .map(ManagedObject::ResourceQuota),
            ObjectKind::ServiceAccount => self
                .get_namespaced::<ServiceAccount>(key)
                .await?
                .map(ManagedObject::ServiceAccount),
            ObjectKind::Role => self
                .get_namespaced::<Role>(key)
                .await?
                .map(ManagedObject::Role),
            ObjectKind::RoleBinding => self
                .get_namespaced::<RoleBinding>(key)
                .await?
                .map(ManagedObject::RoleBinding),
            ObjectKind::NetworkPolicy => self
                .get_namespaced::<NetworkPolicy>(key)
                .await?
                .map(ManagedObject::NetworkPolicy),
            ObjectKind::ConfigMap => self
                .get_namespaced::<ConfigMap>(key)
                .await?
                .map(ManagedObject::ConfigMap),
            ObjectKind::Secret => self
                .get_namespaced::<Secret>(key)
                .await?
                .map(ManagedObject::Secret),
        };
        Ok(object)
    }

    async fn create_object(&self, object: &ManagedObject) -> Result<(), Error> {
        match object {
            ManagedObject::Namespace(ns) => {
                Api::<Namespace>::all(self.client.clone())
                    .create(&PostParams::default(), ns)
                    .await?;
            }
            ManagedObject::ResourceQuota(o) => self.create_namespaced(o).await?,
            ManagedObject::ServiceAccount(o) => self.create_namespaced(o).await?,
            ManagedObject::Role(o) => self.create_namespaced(o).await?,
            ManagedObject::RoleBinding(o) => self.create_namespaced(o).await?,
            ManagedObject::NetworkPolicy(o) => self.create_namespaced(o).await?,
            ManagedObject::ConfigMap(o) => self.create_namespaced(o).await?,
            ManagedObject::Secret(o) => self.create_namespaced(o).await?,
        }
        Ok(())
    }

    async fn replace_object(&self, object: &ManagedObject) -> Result<(), Error> {
        match object {
            ManagedObject::Namespace(ns) => {
                let name = ns.metadata.name.clone().unwrap_or_default();
                Api::<Namespace>::all(self.client.clone())
                    .replace(&name, &PostParams::default(), ns)
                    .await?;
            }
            ManagedObject::ResourceQuota(o) => self.replace_namespaced(o).await?,
            ManagedObject::ServiceAccount(o) => self.replace_namespaced(o).await?,
            ManagedObject::Role(o) => self.replace_namespaced(o).await?,
            ManagedObject::RoleBinding(o) => self.replace_namespaced(o).await?,
            ManagedObject::NetworkPolicy(o) => self.replace_namespaced(o).await?,
            ManagedObject::ConfigMap(o) => self.replace_namespaced(o).await?,
            ManagedObject::Secret(o) => self.replace_namespaced(o).await?,
        }
        Ok(())
    }

    async fn list_secrets(&self, namespace: &str) -> Result<Vec<Secret>, Error> {
        let api: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.list(&Default::default()).await?.items)
    }

    async fn get_statefulset(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<StatefulSet>, Error> {
        let api: Api<StatefulSet> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.get_opt(name).await?)
    }
}
