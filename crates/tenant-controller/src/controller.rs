//! Tenant reconciliation
//!
//! One pass converges a Tenant toward its declared tier:
//!
//! 1. gone: nothing to do
//! 2. deleting: Terminating, snapshot, release the finalizer
//! 3. attach the finalizer
//! 4. first sight: Provisioning with a start time
//! 5. run the provisioners for the tier, in order
//! 6. Ready (or Failed with the error) and the matching metrics
//!
//! Every pass holds the tenant's lock from [`TenantLocks`](crate::locks::TenantLocks),
//! which the drift loop shares.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use k8s_openapi::api::core::v1::ConfigMap;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::runtime::controller::Action;
use kube::runtime::events::EventType;
use kube::{Resource, ResourceExt};
use serde_json::{json, Map, Value};
use tenant_common::crd::{Tenant, TenantState, TenantStatus, TenantTier};
use tenant_common::events::{actions, reasons};
use tenant_common::{
    Error, ANNOTATION_LAST_TIER, LABEL_MANAGED_BY, LABEL_MANAGED_BY_OPERATOR, LABEL_TENANT_NAME,
    TENANT_FINALIZER,
};
use tracing::{debug, info, instrument, warn};

use crate::context::Context;
use crate::objects::ManagedObject;
use crate::provision::{
    ensure_access_control, ensure_companion_control_plane, ensure_credential_export,
    ensure_isolation_boundary, ensure_network_isolation, ensure_quota, ensure_secret_propagation,
    steps, Outcome, ProvisionError,
};

/// Periodic re-convergence interval for Ready tenants
pub const READY_REQUEUE: Duration = Duration::from_secs(300);

/// Retry interval after a recoverable failure
pub const ERROR_REQUEUE: Duration = Duration::from_secs(30);

/// Reconcile a Tenant
#[instrument(skip(tenant, ctx), fields(tenant = %tenant.name_any()))]
pub async fn reconcile(tenant: Arc<Tenant>, ctx: Arc<Context>) -> Result<Action, Error> {
    let name = tenant.name_any();
    let guard = ctx.locks.acquire(&name).await;

    // The object handed in may predate a pass that just released the lock
    let Some(tenant) = ctx.kube.get_tenant(&name).await? else {
        debug!("tenant no longer exists");
        ctx.active.mark_inactive(&name, ctx.metrics.as_ref());
        drop(guard);
        ctx.locks.forget(&name);
        return Ok(Action::await_change());
    };

    if tenant.is_deleting() {
        let action = handle_deletion(&tenant, &ctx).await;
        drop(guard);
        ctx.locks.forget(&name);
        return action;
    }

    if !tenant.has_finalizer() {
        add_finalizer(&tenant, &ctx).await?;
    }

    reconcile_tier(&tenant, &ctx).await
}

/// Requeue recoverable failures; wait for a spec change otherwise
pub fn error_policy(tenant: Arc<Tenant>, error: &Error, _ctx: Arc<Context>) -> Action {
    if error.is_retryable() {
        warn!(
            tenant = %tenant.name_any(),
            error = %error,
            "reconciliation failed, retrying in {}s",
            ERROR_REQUEUE.as_secs()
        );
        Action::requeue(ERROR_REQUEUE)
    } else {
        warn!(
            tenant = %tenant.name_any(),
            error = %error,
            "reconciliation failed permanently, waiting for a spec change"
        );
        Action::await_change()
    }
}

async fn reconcile_tier(tenant: &Tenant, ctx: &Context) -> Result<Action, Error> {
    let name = tenant.name_any();
    let mut status = tenant.status.clone().unwrap_or_default();
    let previous_state = status.state;

    if status.state.is_none() {
        status.state = Some(TenantState::Provisioning);
        status.provisioning_start_time = Some(Utc::now());
        ctx.kube.patch_tenant_status(&name, &status).await?;
        publish(ctx, tenant, EventType::Normal, reasons::PROVISIONING_STARTED, actions::PROVISION, None)
            .await;
        info!("provisioning started");
    }

    // Admission defaults the tier; an unset tier only reaches here without it
    let tier = tenant.spec.tier.clone().unwrap_or(TenantTier::Silver);

    // Provisioners fill in what applies to the tier
    status.namespace = None;
    status.api_endpoint = None;
    status.admin_credential_ref = None;

    let started = Instant::now();
    let result = provision_tier(ctx, tenant, &tier, &mut status).await;
    let elapsed = started.elapsed().as_secs_f64();
    ctx.metrics.record_provisioning_duration(&tier, elapsed);
    ctx.metrics.record_reconcile_duration(&tier, "provision", elapsed);

    match result {
        Ok(outcome) => {
            mark_ready(tenant, ctx, &tier, previous_state, status, &outcome).await?;
            settle_tier_change(tenant, ctx, &tier).await?;
            Ok(Action::requeue(READY_REQUEUE))
        }
        Err(e) => {
            let error = e.into_error(&name);
            mark_failed(tenant, ctx, &tier, status, &error).await;
            Err(error)
        }
    }
}

async fn provision_tier(
    ctx: &Context,
    tenant: &Tenant,
    tier: &TenantTier,
    status: &mut TenantStatus,
) -> Result<Outcome, ProvisionError> {
    match tier {
        TenantTier::Bronze => Ok(Outcome::Unchanged),
        TenantTier::Silver => provision_silver(ctx, tenant, status).await,
        TenantTier::Gold => {
            let outcome = provision_silver(ctx, tenant, status).await?;
            let companion = ensure_companion_control_plane(ctx, tenant, status).await?;
            let credential = ensure_credential_export(ctx, tenant, status).await?;
            Ok(outcome.combine(companion).combine(credential))
        }
        TenantTier::Unrecognized(raw) => {
            Err(ProvisionError::fatal(steps::TIER, format!("unknown tier: {raw}")))
        }
    }
}

async fn provision_silver(
    ctx: &Context,
    tenant: &Tenant,
    status: &mut TenantStatus,
) -> Result<Outcome, ProvisionError> {
    let mut outcome = ensure_isolation_boundary(ctx, tenant, status).await?;
    outcome = outcome.combine(ensure_quota(ctx, tenant).await?);
    outcome = outcome.combine(ensure_access_control(ctx, tenant).await?);
    outcome = outcome.combine(ensure_network_isolation(ctx, tenant).await?);
    Ok(outcome.combine(ensure_secret_propagation(ctx, tenant).await?))
}

async fn mark_ready(
    tenant: &Tenant,
    ctx: &Context,
    tier: &TenantTier,
    previous_state: Option<TenantState>,
    mut status: TenantStatus,
    outcome: &Outcome,
) -> Result<(), Error> {
    if let Outcome::Degraded(reason) = outcome {
        warn!(reason = %reason, "tenant ready with degraded steps");
    }

    status.state = Some(TenantState::Ready);
    status.last_error = None;
    status.last_update_time = Some(Utc::now());
    status.observed_generation = tenant.metadata.generation;
    ctx.kube.patch_tenant_status(&tenant.name_any(), &status).await?;

    // Counted on every pass so a restarted operator re-counts Ready tenants
    ctx.active.mark_ready(&tenant.name_any(), tier, ctx.metrics.as_ref());

    if previous_state != Some(TenantState::Ready) {
        publish(
            ctx,
            tenant,
            EventType::Normal,
            reasons::TENANT_READY,
            actions::RECONCILE,
            Some(format!("{tier} tenant ready")),
        )
        .await;
        info!(tier = %tier, "tenant ready");
    } else if outcome.changed() {
        info!(tier = %tier, outcome = %outcome, "tenant converged");
    }
    Ok(())
}

async fn mark_failed(
    tenant: &Tenant,
    ctx: &Context,
    tier: &TenantTier,
    mut status: TenantStatus,
    error: &Error,
) {
    ctx.metrics.increment_reconciliation_error();
    ctx.metrics.increment_reconciliation_error_for(tier, error.kind());

    // The active gauge counts Ready tenants only
    ctx.active.mark_inactive(&tenant.name_any(), ctx.metrics.as_ref());

    status.state = Some(TenantState::Failed);
    status.last_error = Some(error.to_string());
    if let Err(e) = ctx.kube.patch_tenant_status(&tenant.name_any(), &status).await {
        warn!(error = %e, "failed to record failure in status");
    }
    publish(
        ctx,
        tenant,
        EventType::Warning,
        reasons::TENANT_FAILED,
        actions::PROVISION,
        Some(error.to_string()),
    )
    .await;
}

fn last_tier(tenant: &Tenant) -> Option<TenantTier> {
    tenant
        .annotations()
        .get(ANNOTATION_LAST_TIER)
        .map(|raw| TenantTier::from(raw.clone()))
}

/// Record the reconciled tier and close out a tier migration
///
/// After a downgrade has been carried out, `allowTierMigration` goes back to
/// false so the next downgrade needs its own explicit opt-in.
async fn settle_tier_change(
    tenant: &Tenant,
    ctx: &Context,
    tier: &TenantTier,
) -> Result<(), Error> {
    let last = last_tier(tenant);
    if last.as_ref() == Some(tier) {
        return Ok(());
    }

    let mut patch = Map::new();
    patch.insert(
        "metadata".to_string(),
        json!({ "annotations": { ANNOTATION_LAST_TIER: tier.as_str() } }),
    );
    let downgraded = last.as_ref().is_some_and(|last| tier.is_downgrade_from(last));
    if downgraded && tenant.spec.allow_tier_migration {
        patch.insert("spec".to_string(), json!({ "allowTierMigration": false }));
    }
    ctx.kube.patch_tenant(&tenant.name_any(), &Value::Object(patch)).await?;

    if let Some(last) = last {
        info!(from = %last, to = %tier, "tier migration complete");
        publish(
            ctx,
            tenant,
            EventType::Normal,
            reasons::TIER_MIGRATED,
            actions::RECONCILE,
            Some(format!("{last} -> {tier}")),
        )
        .await;
    }
    Ok(())
}

async fn add_finalizer(tenant: &Tenant, ctx: &Context) -> Result<(), Error> {
    let mut finalizers = tenant.finalizers().to_vec();
    finalizers.push(TENANT_FINALIZER.to_string());
    ctx.kube.set_finalizers(&tenant.name_any(), &finalizers).await?;
    debug!("added finalizer");
    Ok(())
}

async fn handle_deletion(tenant: &Tenant, ctx: &Context) -> Result<Action, Error> {
    let name = tenant.name_any();
    if !tenant.has_finalizer() {
        return Ok(Action::await_change());
    }

    let previous_state = tenant.state();
    if previous_state != Some(TenantState::Terminating) {
        let status = TenantStatus {
            state: Some(TenantState::Terminating),
            ..tenant.status.clone().unwrap_or_default()
        };
        ctx.kube.patch_tenant_status(&name, &status).await?;
        publish(ctx, tenant, EventType::Normal, reasons::DELETION_STARTED, actions::DELETE, None)
            .await;
        info!("deletion started");
    }
    // Releases the tier the tenant was counted under, not the spec's
    ctx.active.mark_inactive(&name, ctx.metrics.as_ref());

    // Snapshot is best-effort; deletion never waits on it
    match take_snapshot(tenant, ctx).await {
        Ok(snapshot) => info!(snapshot = %snapshot, "recorded pre-deletion snapshot"),
        Err(e) => {
            warn!(error = %e, "pre-deletion snapshot failed");
            publish(
                ctx,
                tenant,
                EventType::Warning,
                reasons::SNAPSHOT_FAILED,
                actions::DELETE,
                Some(e.to_string()),
            )
            .await;
        }
    }

    // Owned objects go with the Tenant through garbage collection
    let finalizers: Vec<String> = tenant
        .finalizers()
        .iter()
        .filter(|f| f.as_str() != TENANT_FINALIZER)
        .cloned()
        .collect();
    ctx.kube.set_finalizers(&name, &finalizers).await?;
    info!("finalizer removed");
    Ok(Action::await_change())
}

/// Record of a tenant at deletion time
///
/// Lives in the operator namespace without an owner reference so it
/// outlives the tenant.
pub fn snapshot_config_map(tenant: &Tenant, namespace: &str, at: chrono::DateTime<Utc>) -> ConfigMap {
    let name = tenant.name_any();
    let data = BTreeMap::from([
        ("tenant-name".to_string(), name.clone()),
        ("snapshot-time".to_string(), at.to_rfc3339()),
        ("source-namespace".to_string(), tenant.namespace_name()),
        (
            "tier".to_string(),
            tenant.spec.tier.as_ref().map(|t| t.to_string()).unwrap_or_default(),
        ),
        ("owner".to_string(), tenant.spec.owner.clone()),
        ("status".to_string(), "completed".to_string()),
    ]);
    ConfigMap {
        metadata: ObjectMeta {
            name: Some(format!("snapshot-{name}-{}", at.timestamp())),
            namespace: Some(namespace.to_string()),
            labels: Some(BTreeMap::from([
                (LABEL_TENANT_NAME.to_string(), name),
                ("type".to_string(), "snapshot".to_string()),
                (LABEL_MANAGED_BY.to_string(), LABEL_MANAGED_BY_OPERATOR.to_string()),
            ])),
            ..Default::default()
        },
        data: Some(data),
        ..Default::default()
    }
}

async fn take_snapshot(tenant: &Tenant, ctx: &Context) -> Result<String, Error> {
    let snapshot = snapshot_config_map(tenant, &ctx.settings.operator_namespace, Utc::now());
    let name = snapshot.name_any();
    ctx.kube
        .create_object(&ManagedObject::ConfigMap(snapshot))
        .await?;
    Ok(name)
}

async fn publish(
    ctx: &Context,
    tenant: &Tenant,
    type_: EventType,
    reason: &str,
    action: &str,
    note: Option<String>,
) {
    ctx.events
        .publish(&tenant.object_ref(&()), type_, reason, action, note)
        .await;
}
