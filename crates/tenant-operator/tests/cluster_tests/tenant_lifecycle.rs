//! Integration tests for the tenant lifecycle
//!
//! These tests tell the story of a platform operator onboarding and
//! offboarding tenants through the Kubernetes API.

use k8s_openapi::api::core::v1::{ConfigMap, Namespace, ResourceQuota, ServiceAccount};
use k8s_openapi::api::networking::v1::NetworkPolicy;
use kube::api::{Api, DeleteParams, ListParams, PostParams};
use kube::ResourceExt;

use tenant_common::crd::{Tenant, TenantState, TenantTier};
use tenant_common::{LABEL_TENANT_NAME, NETWORK_POLICY_NAME, OPERATOR_NAMESPACE};
use tenant_controller::provision::{quota_name, service_account_name};

use super::helpers::{
    cleanup_tenant, ensure_test_cluster, sample_tenant, wait_for, wait_for_state, CONVERGE_TIMEOUT,
};

/// Story: Platform operator onboards a Silver tenant
///
/// Expected behavior:
/// - The tenant reaches Ready with its namespace recorded in status
/// - The namespace carries a quota, a service account and the default-deny policy
/// - The tenant is protected by the operator's finalizer
#[tokio::test]
#[ignore = "requires a cluster - run with: cargo test -p tenant-operator --test cluster -- --ignored"]
async fn story_silver_tenant_gets_an_isolated_namespace() {
    let client = ensure_test_cluster().await.expect("failed to setup cluster");
    let name = "it-silver";
    cleanup_tenant(&client, name).await;

    let api: Api<Tenant> = Api::all(client.clone());
    api.create(&PostParams::default(), &sample_tenant(name, TenantTier::Silver))
        .await
        .expect("failed to create tenant");

    let tenant = wait_for_state(&client, name, TenantState::Ready)
        .await
        .expect("tenant becomes ready");
    let namespace = format!("tenant-{name}");
    assert_eq!(tenant.status.as_ref().and_then(|s| s.namespace.clone()), Some(namespace.clone()));
    assert!(tenant.has_finalizer());

    let namespaces: Api<Namespace> = Api::all(client.clone());
    let ns = namespaces.get(&namespace).await.expect("namespace exists");
    assert_eq!(ns.labels().get(LABEL_TENANT_NAME).map(String::as_str), Some(name));

    let quotas: Api<ResourceQuota> = Api::namespaced(client.clone(), &namespace);
    quotas.get(&quota_name(name)).await.expect("quota exists");
    let accounts: Api<ServiceAccount> = Api::namespaced(client.clone(), &namespace);
    accounts
        .get(&service_account_name(name))
        .await
        .expect("service account exists");
    let policies: Api<NetworkPolicy> = Api::namespaced(client.clone(), &namespace);
    policies
        .get(NETWORK_POLICY_NAME)
        .await
        .expect("network policy exists");

    cleanup_tenant(&client, name).await;
}

/// Story: Platform operator onboards a Bronze tenant
///
/// Expected behavior:
/// - The tenant reaches Ready without any namespace being created
#[tokio::test]
#[ignore = "requires a cluster - run with: cargo test -p tenant-operator --test cluster -- --ignored"]
async fn story_bronze_tenant_is_ready_without_a_namespace() {
    let client = ensure_test_cluster().await.expect("failed to setup cluster");
    let name = "it-bronze";
    cleanup_tenant(&client, name).await;

    let api: Api<Tenant> = Api::all(client.clone());
    api.create(&PostParams::default(), &sample_tenant(name, TenantTier::Bronze))
        .await
        .expect("failed to create tenant");

    let tenant = wait_for_state(&client, name, TenantState::Ready)
        .await
        .expect("tenant becomes ready");
    assert_eq!(tenant.status.and_then(|s| s.namespace), None);

    let namespaces: Api<Namespace> = Api::all(client.clone());
    assert!(namespaces
        .get_opt(&format!("tenant-{name}"))
        .await
        .expect("namespace lookup")
        .is_none());

    cleanup_tenant(&client, name).await;
}

/// Story: Platform operator offboards a tenant
///
/// Expected behavior:
/// - A snapshot ConfigMap is written to the operator namespace
/// - The finalizer is released and the Tenant disappears
/// - The tenant namespace is garbage collected through its owner reference
#[tokio::test]
#[ignore = "requires a cluster - run with: cargo test -p tenant-operator --test cluster -- --ignored"]
async fn story_deleted_tenant_is_snapshotted_and_cleaned_up() {
    let client = ensure_test_cluster().await.expect("failed to setup cluster");
    let name = "it-offboard";
    cleanup_tenant(&client, name).await;

    let api: Api<Tenant> = Api::all(client.clone());
    api.create(&PostParams::default(), &sample_tenant(name, TenantTier::Silver))
        .await
        .expect("failed to create tenant");
    wait_for_state(&client, name, TenantState::Ready)
        .await
        .expect("tenant becomes ready");

    api.delete(name, &DeleteParams::default())
        .await
        .expect("failed to delete tenant");

    let tenants = &api;
    wait_for(CONVERGE_TIMEOUT, move || async move {
        matches!(tenants.get_opt(name).await, Ok(None))
    })
    .await
    .expect("tenant is removed once the finalizer is released");

    let snapshots: Api<ConfigMap> = Api::namespaced(client.clone(), OPERATOR_NAMESPACE);
    let selector = format!("{LABEL_TENANT_NAME}={name}");
    let found = snapshots
        .list(&ListParams::default().labels(&selector))
        .await
        .expect("list snapshots");
    let snapshot = found
        .items
        .iter()
        .find(|cm| cm.name_any().starts_with(&format!("snapshot-{name}-")))
        .expect("snapshot written");
    let data = snapshot.data.as_ref().expect("snapshot data");
    assert_eq!(data.get("tenant-name").map(String::as_str), Some(name));
    assert_eq!(data.get("tier").map(String::as_str), Some("Silver"));

    let namespaces: Api<Namespace> = Api::all(client.clone());
    let namespace = format!("tenant-{name}");
    let namespaces = &namespaces;
    let namespace = namespace.as_str();
    wait_for(CONVERGE_TIMEOUT, move || async move {
        match namespaces.get_opt(namespace).await {
            Ok(None) => true,
            // Namespace deletion is asynchronous; terminating counts
            Ok(Some(ns)) => ns.metadata.deletion_timestamp.is_some(),
            Err(_) => false,
        }
    })
    .await
    .expect("tenant namespace is garbage collected");

    for cm in found.items {
        let _ = snapshots.delete(&cm.name_any(), &DeleteParams::default()).await;
    }
}
