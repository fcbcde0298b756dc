//! Test helpers for integration tests
//!
//! Provides a shared operator instance and utilities for waiting on Tenants.

use std::sync::OnceLock;
use std::time::Duration;

use k8s_openapi::api::core::v1::Namespace;
use kube::api::{Api, DeleteParams, ObjectMeta, PostParams};
use kube::Client;
use tokio::sync::OnceCell;
use tokio::time::sleep;

use tenant_common::crd::{Tenant, TenantSpec, TenantState, TenantTier};
use tenant_common::OPERATOR_NAMESPACE;
use tenant_controller::{Context, Settings, TenantLocks};
use tenant_operator::{build_drift_loop, build_tenant_controller, ensure_crds_installed};

/// How often the in-process drift loop sweeps
pub const DRIFT_INTERVAL: Duration = Duration::from_secs(5);

/// Upper bound for the operator to converge a tenant
pub const CONVERGE_TIMEOUT: Duration = Duration::from_secs(90);

/// Ensure the operator is only started once per test binary
static OPERATOR: OnceLock<Result<(), String>> = OnceLock::new();

/// Track if CRD has been installed (async-safe)
static CRD_INSTALLED: OnceCell<Result<(), String>> = OnceCell::const_new();

async fn create_test_client() -> Result<Client, String> {
    Client::try_default()
        .await
        .map_err(|e| format!("failed to create client: {e}"))
}

/// Start the controller and drift loop on their own runtime
///
/// Each `#[tokio::test]` gets a fresh runtime that is dropped when the test
/// ends, so the operator cannot live on a test's runtime.
fn start_operator() -> Result<(), String> {
    let (ready_tx, ready_rx) = std::sync::mpsc::channel();

    std::thread::Builder::new()
        .name("tenant-operator".to_string())
        .spawn(move || {
            let runtime = match tokio::runtime::Runtime::new() {
                Ok(runtime) => runtime,
                Err(e) => {
                    let _ = ready_tx.send(Err(format!("failed to build runtime: {e}")));
                    return;
                }
            };
            runtime.block_on(async move {
                let client = match create_test_client().await {
                    Ok(client) => client,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                let ctx = std::sync::Arc::new(
                    Context::builder(client.clone())
                        .locks(std::sync::Arc::new(TenantLocks::new()))
                        .settings(Settings {
                            readiness_timeout: Duration::from_secs(20),
                            ..Settings::default()
                        })
                        .build(),
                );
                let (controller, store) = build_tenant_controller(client, ctx.clone(), 3);
                let drift = build_drift_loop(ctx, store, DRIFT_INTERVAL);
                let _ = ready_tx.send(Ok(()));
                tokio::join!(controller, drift);
            });
        })
        .map_err(|e| format!("failed to spawn operator thread: {e}"))?;

    ready_rx
        .recv()
        .map_err(|e| format!("operator thread exited: {e}"))?
}

/// Connect to the test cluster with the CRD installed and the operator running
pub async fn ensure_test_cluster() -> Result<Client, String> {
    // Install default crypto provider (required for rustls)
    let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();

    let client = create_test_client().await?;

    let crd_result = CRD_INSTALLED
        .get_or_init(|| async {
            let client = create_test_client().await?;
            ensure_crds_installed(&client)
                .await
                .map_err(|e| format!("failed to install CRD: {e}"))?;
            ensure_operator_namespace(&client).await?;
            // Give the apiserver a moment to serve the new resource
            sleep(Duration::from_secs(2)).await;
            Ok(())
        })
        .await;
    crd_result.clone()?;

    OPERATOR.get_or_init(start_operator).clone()?;

    Ok(client)
}

async fn ensure_operator_namespace(client: &Client) -> Result<(), String> {
    let namespaces: Api<Namespace> = Api::all(client.clone());
    let namespace = Namespace {
        metadata: ObjectMeta {
            name: Some(OPERATOR_NAMESPACE.to_string()),
            ..Default::default()
        },
        ..Default::default()
    };
    match namespaces.create(&PostParams::default(), &namespace).await {
        Ok(_) => Ok(()),
        Err(kube::Error::Api(e)) if e.code == 409 => Ok(()),
        Err(e) => Err(format!("failed to create operator namespace: {e}")),
    }
}

/// Build a Tenant the way a platform operator would write it
pub fn sample_tenant(name: &str, tier: TenantTier) -> Tenant {
    Tenant::new(
        name,
        TenantSpec {
            tier: Some(tier),
            owner: "platform-team@acme.com".to_string(),
            ..Default::default()
        },
    )
}

/// Delete a tenant left over from an earlier run and wait until it is gone
pub async fn cleanup_tenant(client: &Client, name: &str) {
    let api: Api<Tenant> = Api::all(client.clone());
    let _ = api.delete(name, &DeleteParams::default()).await;
    let api = &api;
    let _ = wait_for(CONVERGE_TIMEOUT, move || async move {
        matches!(api.get_opt(name).await, Ok(None))
    })
    .await;
}

/// Wait until the tenant reports `state`
pub async fn wait_for_state(client: &Client, name: &str, state: TenantState) -> Result<Tenant, String> {
    let api: Api<Tenant> = Api::all(client.clone());
    let api_ref = &api;
    wait_for(CONVERGE_TIMEOUT, move || async move {
        matches!(api_ref.get_opt(name).await, Ok(Some(t)) if t.state() == Some(state))
    })
    .await
    .map_err(|_| format!("tenant {name} never reached {state:?}"))?;
    api.get(name)
        .await
        .map_err(|e| format!("failed to read tenant {name}: {e}"))
}

/// Poll `check` every second until it holds or `timeout` elapses
pub async fn wait_for<F, Fut>(timeout: Duration, mut check: F) -> Result<(), ()>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if check().await {
            return Ok(());
        }
        sleep(Duration::from_secs(1)).await;
    }
    Err(())
}
