//! Integration tests for network isolation drift
//!
//! These tests tell the story of a tenant user loosening their namespace's
//! default-deny policy and the operator restoring it.

use k8s_openapi::api::networking::v1::{IPBlock, NetworkPolicy, NetworkPolicyEgressRule, NetworkPolicyPeer};
use kube::api::{Api, PostParams};

use tenant_common::crd::{Tenant, TenantState, TenantTier};
use tenant_common::NETWORK_POLICY_NAME;

use super::helpers::{
    cleanup_tenant, ensure_test_cluster, sample_tenant, wait_for, wait_for_state, CONVERGE_TIMEOUT,
};

/// Story: A tenant user opens egress to the internet by hand
///
/// Expected behavior:
/// - The policy is restored to the rules derived from the Tenant spec,
///   either by the owned-object watch or by the periodic drift sweep
#[tokio::test]
#[ignore = "requires a cluster - run with: cargo test -p tenant-operator --test cluster -- --ignored"]
async fn story_hand_edited_policy_is_restored() {
    let client = ensure_test_cluster().await.expect("failed to setup cluster");
    let name = "it-drift";
    cleanup_tenant(&client, name).await;

    let api: Api<Tenant> = Api::all(client.clone());
    api.create(&PostParams::default(), &sample_tenant(name, TenantTier::Silver))
        .await
        .expect("failed to create tenant");
    wait_for_state(&client, name, TenantState::Ready)
        .await
        .expect("tenant becomes ready");

    let namespace = format!("tenant-{name}");
    let policies: Api<NetworkPolicy> = Api::namespaced(client.clone(), &namespace);
    let original = policies.get(NETWORK_POLICY_NAME).await.expect("policy exists");
    let want = original.spec.clone();

    let mut tampered = original.clone();
    if let Some(spec) = tampered.spec.as_mut() {
        spec.egress.get_or_insert_with(Vec::new).push(NetworkPolicyEgressRule {
            to: Some(vec![NetworkPolicyPeer {
                ip_block: Some(IPBlock {
                    cidr: "0.0.0.0/0".to_string(),
                    except: None,
                }),
                ..Default::default()
            }]),
            ports: None,
        });
    }
    policies
        .replace(NETWORK_POLICY_NAME, &PostParams::default(), &tampered)
        .await
        .expect("tamper with policy");

    let policies = &policies;
    let want = &want;
    wait_for(CONVERGE_TIMEOUT, move || async move {
        matches!(policies.get(NETWORK_POLICY_NAME).await, Ok(p) if &p.spec == want)
    })
    .await
    .expect("policy is restored");

    cleanup_tenant(&client, name).await;
}
