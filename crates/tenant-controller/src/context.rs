//! Shared reconciler state

use std::sync::Arc;
use std::time::Duration;

use kube::Client;
use tenant_common::events::{EventPublisher, KubeEventPublisher};
use tenant_common::metrics::{MetricsSink, OtelMetricsSink};
use tenant_common::{CONTROLLER_NAME, OPERATOR_NAMESPACE};

use crate::active::ActiveTenants;
use crate::client::{KubeClient, KubeClientImpl};
use crate::locks::TenantLocks;

/// Default bound on the companion control plane readiness wait
pub const DEFAULT_READINESS_TIMEOUT: Duration = Duration::from_secs(300);

/// Default interval between companion readiness checks
pub const DEFAULT_READINESS_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Tunables for a reconcile pass
#[derive(Clone, Debug)]
pub struct Settings {
    /// Namespace holding snapshots and the sources for propagation
    pub operator_namespace: String,
    /// How long to wait for the companion control plane before degrading
    pub readiness_timeout: Duration,
    /// How often to check companion readiness
    pub readiness_poll_interval: Duration,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            operator_namespace: OPERATOR_NAMESPACE.to_string(),
            readiness_timeout: DEFAULT_READINESS_TIMEOUT,
            readiness_poll_interval: DEFAULT_READINESS_POLL_INTERVAL,
        }
    }
}

/// Controller context containing shared state and clients
///
/// Use [`ContextBuilder`] to construct instances:
///
/// ```text
/// let ctx = Context::builder(client)
///     .settings(settings)
///     .build();
/// ```
pub struct Context {
    /// Kubernetes client for API operations (trait object for testability)
    pub kube: Arc<dyn KubeClient>,
    /// Kubernetes Event publisher
    pub events: Arc<dyn EventPublisher>,
    /// Metrics sink
    pub metrics: Arc<dyn MetricsSink>,
    /// Per-tenant locks shared with the drift loop
    pub locks: Arc<TenantLocks>,
    /// Tenants counted in the active gauge by this process
    pub active: Arc<ActiveTenants>,
    /// Reconcile tunables
    pub settings: Settings,
}

impl Context {
    /// Create a builder for constructing a Context
    pub fn builder(client: Client) -> ContextBuilder {
        ContextBuilder::new(client)
    }

    /// Create a context for testing with a custom kube client
    ///
    /// Events and metrics are dropped; readiness waits use the defaults.
    #[cfg(test)]
    pub fn for_testing(kube: Arc<dyn KubeClient>) -> Self {
        Self {
            kube,
            events: Arc::new(tenant_common::events::NoopEventPublisher),
            metrics: Arc::new(tenant_common::metrics::NoopMetricsSink),
            locks: Arc::new(TenantLocks::new()),
            active: Arc::new(ActiveTenants::new()),
            settings: Settings::default(),
        }
    }
}

/// Builder for constructing [`Context`] instances
pub struct ContextBuilder {
    client: Client,
    kube: Option<Arc<dyn KubeClient>>,
    events: Option<Arc<dyn EventPublisher>>,
    metrics: Option<Arc<dyn MetricsSink>>,
    locks: Option<Arc<TenantLocks>>,
    settings: Settings,
}

impl ContextBuilder {
    fn new(client: Client) -> Self {
        Self {
            client,
            kube: None,
            events: None,
            metrics: None,
            locks: None,
            settings: Settings::default(),
        }
    }

    /// Override the Kubernetes client (primarily for testing)
    pub fn kube_client(mut self, kube: Arc<dyn KubeClient>) -> Self {
        self.kube = Some(kube);
        self
    }

    /// Override the event publisher
    pub fn events(mut self, events: Arc<dyn EventPublisher>) -> Self {
        self.events = Some(events);
        self
    }

    /// Override the metrics sink
    pub fn metrics(mut self, metrics: Arc<dyn MetricsSink>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Share a lock table with another component
    pub fn locks(mut self, locks: Arc<TenantLocks>) -> Self {
        self.locks = Some(locks);
        self
    }

    /// Set reconcile tunables
    pub fn settings(mut self, settings: Settings) -> Self {
        self.settings = settings;
        self
    }

    /// Build the Context
    pub fn build(self) -> Context {
        Context {
            kube: self
                .kube
                .unwrap_or_else(|| Arc::new(KubeClientImpl::new(self.client.clone()))),
            events: self
                .events
                .unwrap_or_else(|| Arc::new(KubeEventPublisher::new(self.client.clone(), CONTROLLER_NAME))),
            metrics: self.metrics.unwrap_or_else(|| Arc::new(OtelMetricsSink)),
            locks: self.locks.unwrap_or_default(),
            active: Arc::default(),
            settings: self.settings,
        }
    }
}
