//! Kubernetes Event recording for the tenant controller.
//!
//! Provides a trait-based abstraction over `kube::runtime::events::Recorder`
//! so reconcile and drift correction can emit Events visible via
//! `kubectl describe tenant <name>`.
//!
//! Events are fire-and-forget: failures are logged as warnings and never
//! propagate errors.

use async_trait::async_trait;
use k8s_openapi::api::core::v1::ObjectReference;
use kube::runtime::events::{EventType, Recorder, Reporter};
use kube::Client;
use tracing::warn;

/// Trait for publishing Kubernetes Events.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    /// Publish a Kubernetes Event on the given resource.
    ///
    /// # Arguments
    ///
    /// * `resource_ref` - The Kubernetes object this event is about
    /// * `type_` - Normal or Warning
    /// * `reason` - Machine-readable reason string (e.g. "TenantReady")
    /// * `action` - What action was taken (e.g. "Reconcile")
    /// * `note` - Optional human-readable message
    async fn publish(
        &self,
        resource_ref: &ObjectReference,
        type_: EventType,
        reason: &str,
        action: &str,
        note: Option<String>,
    );
}

/// Production implementation wrapping `kube::runtime::events::Recorder`.
pub struct KubeEventPublisher {
    recorder: Recorder,
}

impl KubeEventPublisher {
    /// Create a new publisher reporting as `controller_name`.
    pub fn new(client: Client, controller_name: &str) -> Self {
        let reporter = Reporter {
            controller: controller_name.to_string(),
            instance: std::env::var("POD_NAME").ok(),
        };
        Self {
            recorder: Recorder::new(client, reporter),
        }
    }
}

#[async_trait]
impl EventPublisher for KubeEventPublisher {
    async fn publish(
        &self,
        resource_ref: &ObjectReference,
        type_: EventType,
        reason: &str,
        action: &str,
        note: Option<String>,
    ) {
        let event = kube::runtime::events::Event {
            type_,
            reason: reason.to_string(),
            note,
            action: action.to_string(),
            secondary: None,
        };
        if let Err(e) = self.recorder.publish(&event, resource_ref).await {
            warn!(
                reason,
                action,
                error = %e,
                "Failed to publish Kubernetes event"
            );
        }
    }
}

/// Publisher that drops every event.
pub struct NoopEventPublisher;

#[async_trait]
impl EventPublisher for NoopEventPublisher {
    async fn publish(
        &self,
        _resource_ref: &ObjectReference,
        _type_: EventType,
        _reason: &str,
        _action: &str,
        _note: Option<String>,
    ) {
    }
}

/// Well-known event reason strings.
pub mod reasons {
    /// First reconcile of a tenant began provisioning
    pub const PROVISIONING_STARTED: &str = "ProvisioningStarted";
    /// All tier infrastructure converged
    pub const TENANT_READY: &str = "TenantReady";
    /// A provisioning step failed; retry scheduled
    pub const TENANT_FAILED: &str = "TenantFailed";
    /// Tenant deletion initiated
    pub const DELETION_STARTED: &str = "DeletionStarted";
    /// Pre-deletion snapshot could not be written
    pub const SNAPSHOT_FAILED: &str = "SnapshotFailed";
    /// Companion control plane did not become ready in time
    pub const COMPANION_NOT_READY: &str = "CompanionNotReady";
    /// Exported admin credential is a placeholder
    pub const PLACEHOLDER_CREDENTIAL: &str = "PlaceholderCredential";
    /// Live network policy differed from the spec and was overwritten
    pub const NETWORK_POLICY_DRIFT_CORRECTED: &str = "NetworkPolicyDriftCorrected";
    /// A secret or config map could not be copied into the tenant namespace
    pub const PROPAGATION_SKIPPED: &str = "PropagationSkipped";
    /// Tier migration opt-in was consumed and reset
    pub const TIER_MIGRATED: &str = "TierMigrated";
}

/// Well-known event action strings.
pub mod actions {
    /// Standard reconciliation loop
    pub const RECONCILE: &str = "Reconcile";
    /// Provisioning infrastructure
    pub const PROVISION: &str = "Provision";
    /// Deleting tenant resources
    pub const DELETE: &str = "Delete";
    /// Reverting manual edits
    pub const CORRECT_DRIFT: &str = "CorrectDrift";
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn noop_publisher_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<NoopEventPublisher>();
    }

    #[test]
    fn reason_constants_are_pascal_case() {
        assert_eq!(reasons::TENANT_READY, "TenantReady");
        assert_eq!(
            reasons::NETWORK_POLICY_DRIFT_CORRECTED,
            "NetworkPolicyDriftCorrected"
        );
    }

    #[tokio::test]
    async fn noop_publisher_does_not_panic() {
        NoopEventPublisher
            .publish(
                &ObjectReference::default(),
                EventType::Warning,
                reasons::TENANT_FAILED,
                actions::RECONCILE,
                Some("quota rejected".to_string()),
            )
            .await;
    }
}
