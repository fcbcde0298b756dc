//! Default-deny network isolation for the tenant namespace
//!
//! The rule set is recomputed from the spec on every call, never patched
//! incrementally, so manual edits to the live policy are always reverted.

use std::collections::BTreeMap;

use k8s_openapi::api::networking::v1::{
    IPBlock, NetworkPolicy, NetworkPolicyEgressRule, NetworkPolicyIngressRule, NetworkPolicyPeer,
    NetworkPolicyPort, NetworkPolicySpec,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use tenant_common::crd::Tenant;
use tenant_common::kube_utils::owned_meta;
use tenant_common::{Error, NETWORK_POLICY_NAME};
use tracing::debug;

use super::{converge, steps, Outcome, ProvisionError};
use crate::context::Context;
use crate::objects::ManagedObject;

const DNS_PORT: i32 = 53;
const DNS_NAMESPACE: &str = "kube-system";
const NAMESPACE_NAME_LABEL: &str = "kubernetes.io/metadata.name";
const ANY_ADDRESS: &str = "0.0.0.0/0";

/// Split a whitelist entry into `(namespace, service)`
///
/// `namespace/service[:port]`; an entry without `/` names a service in
/// `default`. The port is dropped: egress is allowed per namespace.
pub fn parse_service_ref(entry: &str) -> (String, String) {
    let (namespace, service) = entry.split_once('/').unwrap_or(("default", entry));
    let service = service.split(':').next().unwrap_or(service);
    (namespace.to_string(), service.to_string())
}

fn selector(key: &str, value: &str) -> LabelSelector {
    LabelSelector {
        match_labels: Some(BTreeMap::from([(key.to_string(), value.to_string())])),
        ..Default::default()
    }
}

fn dns_rule() -> NetworkPolicyEgressRule {
    let port = |protocol: &str| NetworkPolicyPort {
        protocol: Some(protocol.to_string()),
        port: Some(IntOrString::Int(DNS_PORT)),
        ..Default::default()
    };
    NetworkPolicyEgressRule {
        to: Some(vec![NetworkPolicyPeer {
            namespace_selector: Some(selector(NAMESPACE_NAME_LABEL, DNS_NAMESPACE)),
            ..Default::default()
        }]),
        ports: Some(vec![port("UDP"), port("TCP")]),
    }
}

fn namespace_rule(namespace: &str) -> NetworkPolicyEgressRule {
    NetworkPolicyEgressRule {
        to: Some(vec![NetworkPolicyPeer {
            namespace_selector: Some(selector(NAMESPACE_NAME_LABEL, namespace)),
            pod_selector: Some(LabelSelector::default()),
            ..Default::default()
        }]),
        ports: None,
    }
}

fn internet_rule() -> NetworkPolicyEgressRule {
    NetworkPolicyEgressRule {
        to: Some(vec![NetworkPolicyPeer {
            ip_block: Some(IPBlock {
                cidr: ANY_ADDRESS.to_string(),
                except: None,
            }),
            ..Default::default()
        }]),
        ports: None,
    }
}

/// Desired `default-deny-all` policy for `tenant`
pub fn desired_network_policy(tenant: &Tenant) -> Result<NetworkPolicy, Error> {
    let network = &tenant.spec.network;

    // Same-namespace traffic only
    let ingress = vec![NetworkPolicyIngressRule {
        from: Some(vec![NetworkPolicyPeer {
            pod_selector: Some(LabelSelector::default()),
            ..Default::default()
        }]),
        ports: None,
    }];

    let mut egress = vec![dns_rule()];
    for entry in network.whitelist() {
        let (namespace, service) = parse_service_ref(entry);
        debug!(namespace = %namespace, service = %service, "whitelisted egress");
        egress.push(namespace_rule(&namespace));
    }
    if network.allow_internet_access {
        egress.push(internet_rule());
    }

    let namespace = tenant.namespace_name();
    Ok(NetworkPolicy {
        metadata: owned_meta(tenant, NETWORK_POLICY_NAME, Some(&namespace))?,
        spec: Some(NetworkPolicySpec {
            pod_selector: LabelSelector::default(),
            policy_types: Some(vec!["Ingress".to_string(), "Egress".to_string()]),
            ingress: Some(ingress),
            egress: Some(egress),
        }),
        ..Default::default()
    })
}

/// Ensure the tenant namespace is isolated by the default-deny policy
pub async fn ensure_network_isolation(
    ctx: &Context,
    tenant: &Tenant,
) -> Result<Outcome, ProvisionError> {
    let policy =
        desired_network_policy(tenant).map_err(ProvisionError::recoverable(steps::NETWORK))?;
    converge(ctx.kube.as_ref(), ManagedObject::NetworkPolicy(policy))
        .await
        .map_err(ProvisionError::recoverable(steps::NETWORK))
}
