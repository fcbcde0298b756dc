//! Network isolation drift detection
//!
//! Someone with access to the tenant namespace can loosen the default-deny
//! policy. The detector recomputes the policy from the spec, compares it with
//! the live one and puts it back.

use std::sync::Arc;

use k8s_openapi::api::networking::v1::{NetworkPolicy, NetworkPolicySpec};
use kube::runtime::events::EventType;
use kube::{Resource, ResourceExt};
use tenant_common::crd::{Tenant, TenantTier};
use tenant_common::events::{actions, reasons};
use tenant_common::Error;
use tracing::{debug, info, instrument, warn};

use crate::context::Context;
use crate::objects::ManagedObject;
use crate::provision::desired_network_policy;

/// Describe how `live` differs from `desired`; None if it does not
pub fn describe_drift(desired: &NetworkPolicy, live: Option<&NetworkPolicy>) -> Option<String> {
    let Some(live) = live else {
        return Some("policy missing".to_string());
    };
    let empty = NetworkPolicySpec::default();
    let want = desired.spec.as_ref().unwrap_or(&empty);
    let have = live.spec.as_ref().unwrap_or(&empty);

    let count = |rules: Option<usize>| rules.unwrap_or(0);
    let (want_in, have_in) = (
        count(want.ingress.as_ref().map(Vec::len)),
        count(have.ingress.as_ref().map(Vec::len)),
    );
    let (want_out, have_out) = (
        count(want.egress.as_ref().map(Vec::len)),
        count(have.egress.as_ref().map(Vec::len)),
    );
    if want_in != have_in || want_out != have_out {
        return Some(format!(
            "ingress rules {have_in} (want {want_in}), egress rules {have_out} (want {want_out})"
        ));
    }
    if want != have {
        return Some("rule content changed".to_string());
    }
    None
}

/// Restore the tenant's network policy if it drifted
///
/// A missing policy is recreated and counts as drift. Returns true if
/// anything was corrected.
#[instrument(skip(ctx, tenant), fields(tenant = %tenant.name_any()))]
pub async fn detect_and_correct_network_isolation_drift(
    ctx: &Context,
    tenant: &Tenant,
) -> Result<bool, Error> {
    let desired = desired_network_policy(tenant)?;
    let desired_object = ManagedObject::NetworkPolicy(desired.clone());
    let live = ctx.kube.get_object(&desired_object.key()).await?;
    let live_policy = match &live {
        Some(ManagedObject::NetworkPolicy(policy)) => Some(policy),
        _ => None,
    };

    let Some(drift) = describe_drift(&desired, live_policy) else {
        // Only bookkeeping metadata differs; converge it quietly
        if let Some(merged) = live.as_ref().and_then(|l| desired_object.merged_onto(l)) {
            ctx.kube.replace_object(&merged).await?;
        }
        debug!("no network policy drift");
        return Ok(false);
    };

    match live.as_ref() {
        None => ctx.kube.create_object(&desired_object).await?,
        Some(live) => {
            let merged = desired_object
                .merged_onto(live)
                .unwrap_or_else(|| desired_object.clone());
            ctx.kube.replace_object(&merged).await?;
        }
    }

    let namespace = tenant.namespace_name();
    info!(namespace = %namespace, drift = %drift, "corrected network policy drift");
    ctx.metrics
        .record_drift_corrected(&tenant.name_any(), &namespace);
    ctx.events
        .publish(
            &tenant.object_ref(&()),
            EventType::Warning,
            reasons::NETWORK_POLICY_DRIFT_CORRECTED,
            actions::CORRECT_DRIFT,
            Some(format!("{}: {drift}", tenant_common::NETWORK_POLICY_NAME)),
        )
        .await;
    Ok(true)
}

/// True if the drift loop should look at `tenant`
///
/// Only tiers that get a boundary carry a policy, and only once the boundary
/// has been provisioned.
pub fn needs_drift_check(tenant: &Tenant) -> bool {
    let tier = tenant.spec.tier.clone().unwrap_or(TenantTier::Silver);
    let provisioned = tenant
        .status
        .as_ref()
        .is_some_and(|status| status.namespace.is_some());
    !tenant.is_deleting() && matches!(tier, TenantTier::Silver | TenantTier::Gold) && provisioned
}

/// Run the detector over a batch of cached tenants
///
/// Each tenant is re-read under its lock since the cache may lag behind a
/// deletion or a tier change. Failures are logged and skipped. Returns the
/// number of tenants whose policy was corrected.
pub async fn sweep_network_drift(ctx: &Context, tenants: &[Arc<Tenant>]) -> usize {
    let mut corrected = 0;
    for cached in tenants.iter().filter(|t| needs_drift_check(t)) {
        let name = cached.name_any();
        let _guard = ctx.locks.acquire(&name).await;

        let tenant = match ctx.kube.get_tenant(&name).await {
            Ok(Some(tenant)) if needs_drift_check(&tenant) => tenant,
            Ok(_) => continue,
            Err(e) => {
                warn!(tenant = %name, error = %e, "failed to read tenant for drift check");
                continue;
            }
        };

        match detect_and_correct_network_isolation_drift(ctx, &tenant).await {
            Ok(true) => corrected += 1,
            Ok(false) => {}
            Err(e) => warn!(tenant = %name, error = %e, "drift check failed"),
        }
    }
    corrected
}
