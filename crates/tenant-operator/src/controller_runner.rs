//! Controller runner - builds the Tenant controller and its drift loop
//!
//! The builders return futures without spawning them, so `main` decides how
//! they are composed.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use futures::{future, StreamExt, TryStreamExt};
use k8s_openapi::api::core::v1::Namespace;
use k8s_openapi::api::networking::v1::NetworkPolicy;
use kube::runtime::controller::Config as ControllerConfig;
use kube::runtime::reflector::{self, Store};
use kube::runtime::watcher::{self, Config as WatcherConfig};
use kube::runtime::{Controller, WatchStreamExt};
use kube::{Api, Client, ResourceExt};
use tenant_common::crd::Tenant;
use tenant_controller::{error_policy, reconcile, sweep_network_drift, ChangeFilter, Context};
use tokio::time::MissedTickBehavior;

/// Watcher timeout (seconds) - must be less than client read_timeout (30s)
/// This forces the API server to close the watch before the client times out,
/// preventing "body read timed out" errors on idle watches.
const WATCH_TIMEOUT_SECS: u32 = 25;

/// A controller or side-loop ready to be awaited
pub type ControllerFuture = Pin<Box<dyn Future<Output = ()> + Send>>;

/// Build the Tenant controller
///
/// The Tenant watch feeds a shared store before change filtering, so the
/// store (returned for the drift loop) sees every write while the reconciler
/// only sees spec and deletion changes. Changes to owned namespaces and
/// network policies bypass the filter.
pub fn build_tenant_controller(
    client: Client,
    ctx: Arc<Context>,
    concurrency: u16,
) -> (ControllerFuture, Store<Tenant>) {
    let tenants: Api<Tenant> = Api::all(client.clone());
    let (reader, writer) = reflector::store();
    let filter = Arc::new(ChangeFilter::new());
    let forget = filter.clone();

    let trigger = watcher::watcher(tenants, WatcherConfig::default().timeout(WATCH_TIMEOUT_SECS))
        .default_backoff()
        .reflect(writer)
        .inspect_ok(move |event| {
            if let watcher::Event::Delete(tenant) = event {
                forget.forget(&tenant.name_any());
            }
        })
        .applied_objects()
        .try_filter(move |tenant| future::ready(filter.admit(tenant)));

    tracing::info!(concurrency, "- Tenant controller");

    let controller = Controller::for_stream(trigger, reader.clone())
        .with_config(ControllerConfig::default().concurrency(concurrency))
        .owns(
            Api::<Namespace>::all(client.clone()),
            WatcherConfig::default().timeout(WATCH_TIMEOUT_SECS),
        )
        .owns(
            Api::<NetworkPolicy>::all(client),
            WatcherConfig::default().timeout(WATCH_TIMEOUT_SECS),
        )
        .shutdown_on_signal()
        .run(reconcile, error_policy, ctx)
        .for_each(log_reconcile_result("Tenant"));

    (Box::pin(controller), reader)
}

/// Build the periodic network isolation drift loop
///
/// The first sweep runs one interval after start, giving the controller time
/// to fill the store and converge.
pub fn build_drift_loop(ctx: Arc<Context>, store: Store<Tenant>, interval: Duration) -> ControllerFuture {
    tracing::info!(interval_secs = interval.as_secs(), "- Network policy drift loop");

    Box::pin(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately
        ticker.tick().await;

        loop {
            ticker.tick().await;
            let tenants = store.state();
            let corrected = sweep_network_drift(&ctx, &tenants).await;
            if corrected > 0 {
                tracing::info!(corrected, checked = tenants.len(), "Drift sweep corrected tenants");
            } else {
                tracing::debug!(checked = tenants.len(), "Drift sweep found no drift");
            }
        }
    })
}

fn log_reconcile_result<T: std::fmt::Debug, E: std::fmt::Debug>(
    controller_name: &'static str,
) -> impl Fn(Result<T, E>) -> std::future::Ready<()> {
    move |result| {
        match result {
            Ok(action) => tracing::debug!(?action, "{} reconciliation completed", controller_name),
            Err(e) => tracing::error!(error = ?e, "{} reconciliation error", controller_name),
        }
        std::future::ready(())
    }
}
