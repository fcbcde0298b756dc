//! Tenant CRD: a declaratively provisioned, isolated tenant environment

use std::fmt;

use chrono::{DateTime, Utc};
use kube::{CustomResource, ResourceExt};
use schemars::gen::SchemaGenerator;
use schemars::schema::{InstanceType, Schema, SchemaObject};
use schemars::JsonSchema;
use serde::{Deserialize, Deserializer, Serialize};

// =============================================================================
// CRD
// =============================================================================

/// Spec for a Tenant: the tier and limits of one isolated environment
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "platform.io",
    version = "v1alpha1",
    kind = "Tenant",
    plural = "tenants",
    shortname = "ten",
    status = "TenantStatus",
    printcolumn = r#"{"name":"Tier","type":"string","jsonPath":".spec.tier"}"#,
    printcolumn = r#"{"name":"State","type":"string","jsonPath":".status.state"}"#,
    printcolumn = r#"{"name":"Namespace","type":"string","jsonPath":".status.namespace"}"#,
    printcolumn = r#"{"name":"Owner","type":"string","jsonPath":".spec.owner"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct TenantSpec {
    /// Isolation tier. Defaulted to Silver at admission when absent.
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "empty_tier_as_none"
    )]
    #[schemars(with = "Option<TenantTier>")]
    pub tier: Option<TenantTier>,

    /// Contact email of the tenant owner
    #[serde(default)]
    pub owner: String,

    /// Compute limits applied through the tenant quota
    #[serde(default)]
    pub resources: ResourceSpec,

    /// Egress and internet access rules
    #[serde(default)]
    pub network: NetworkSpec,

    /// Must be true on the update that moves the tenant to a lower tier
    #[serde(default)]
    pub allow_tier_migration: bool,

    /// Scale-to-zero intent
    #[serde(default)]
    pub suspend: bool,
}

/// Compute limits for a tenant
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ResourceSpec {
    /// CPU cap, e.g. `1000m` or `2`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schemars(regex(pattern = r"^(\d+m|\d+\.?\d*|\d*\.?\d+)$"))]
    pub cpu: Option<String>,

    /// Memory cap, e.g. `512Mi` or `1Gi`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schemars(regex(pattern = r"^(\d+Mi|\d+Gi|\d+Ti)$"))]
    pub memory: Option<String>,

    /// Storage class for tenant volumes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage_class: Option<String>,
}

impl ResourceSpec {
    /// CPU to enforce: the declared value if it parses, else the default
    pub fn effective_cpu(&self) -> &str {
        match self.cpu.as_deref() {
            Some(cpu) if super::is_valid_cpu(cpu) => cpu,
            _ => super::DEFAULT_CPU,
        }
    }

    /// Memory to enforce: the declared value if it parses, else the default
    pub fn effective_memory(&self) -> &str {
        match self.memory.as_deref() {
            Some(memory) if super::is_valid_memory(memory) => memory,
            _ => super::DEFAULT_MEMORY,
        }
    }
}

/// Network access for a tenant
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NetworkSpec {
    /// Allow egress to any address outside the cluster
    #[serde(default)]
    pub allow_internet_access: bool,

    /// Egress targets as `namespace/service[:port]`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub whitelisted_services: Option<Vec<String>>,
}

impl NetworkSpec {
    /// Whitelist entries, treating an absent list as empty
    pub fn whitelist(&self) -> &[String] {
        self.whitelisted_services.as_deref().unwrap_or_default()
    }
}

// =============================================================================
// Tier
// =============================================================================

/// Isolation tier, ordered by strength: Bronze < Silver < Gold
///
/// Values outside the known set are preserved as `Unrecognized` so they can
/// be rejected with a field error instead of failing to decode.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum TenantTier {
    /// Placeholder tier, no infrastructure
    Bronze,
    /// Dedicated namespace with quota, RBAC and network isolation
    Silver,
    /// Silver plus a dedicated companion control plane
    Gold,
    /// Any other value
    Unrecognized(String),
}

impl TenantTier {
    /// The tiers a Tenant may declare, weakest first
    pub const KNOWN: [TenantTier; 3] = [TenantTier::Bronze, TenantTier::Silver, TenantTier::Gold];

    /// Position in the isolation ordering; None for unrecognized values
    pub fn isolation_index(&self) -> Option<u8> {
        match self {
            Self::Bronze => Some(0),
            Self::Silver => Some(1),
            Self::Gold => Some(2),
            Self::Unrecognized(_) => None,
        }
    }

    /// True if moving from `previous` to `self` lowers isolation
    pub fn is_downgrade_from(&self, previous: &TenantTier) -> bool {
        match (self.isolation_index(), previous.isolation_index()) {
            (Some(new), Some(old)) => new < old,
            _ => false,
        }
    }

    /// Wire representation
    pub fn as_str(&self) -> &str {
        match self {
            Self::Bronze => "Bronze",
            Self::Silver => "Silver",
            Self::Gold => "Gold",
            Self::Unrecognized(raw) => raw,
        }
    }

    /// Lower-case label value used in metrics
    pub fn metric_label(&self) -> &'static str {
        match self {
            Self::Bronze => "bronze",
            Self::Silver => "silver",
            Self::Gold => "gold",
            Self::Unrecognized(_) => "unknown",
        }
    }
}

impl From<String> for TenantTier {
    fn from(raw: String) -> Self {
        match raw.as_str() {
            "Bronze" => Self::Bronze,
            "Silver" => Self::Silver,
            "Gold" => Self::Gold,
            _ => Self::Unrecognized(raw),
        }
    }
}

impl From<TenantTier> for String {
    fn from(tier: TenantTier) -> Self {
        tier.as_str().to_string()
    }
}

impl fmt::Display for TenantTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl JsonSchema for TenantTier {
    fn schema_name() -> String {
        "TenantTier".to_string()
    }

    fn is_referenceable() -> bool {
        false
    }

    fn json_schema(_: &mut SchemaGenerator) -> Schema {
        SchemaObject {
            instance_type: Some(InstanceType::String.into()),
            enum_values: Some(
                Self::KNOWN
                    .iter()
                    .map(|t| serde_json::Value::String(t.as_str().to_string()))
                    .collect(),
            ),
            ..Default::default()
        }
        .into()
    }
}

fn empty_tier_as_none<'de, D>(deserializer: D) -> Result<Option<TenantTier>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<String> = Option::deserialize(deserializer)?;
    Ok(raw
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .map(TenantTier::from))
}

// =============================================================================
// Status
// =============================================================================

/// Status of a Tenant, written only by the reconciler
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TenantStatus {
    /// Lifecycle state
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<TenantState>,

    /// Isolation boundary (namespace) allocated to the tenant
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,

    /// Companion control plane endpoint (Gold only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_endpoint: Option<String>,

    /// Name of the Secret holding the admin kubeconfig (Gold only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub admin_credential_ref: Option<String>,

    /// When the first provisioning attempt started
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provisioning_start_time: Option<DateTime<Utc>>,

    /// When the tenant last reached Ready
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_update_time: Option<DateTime<Utc>>,

    /// Message of the most recent reconcile failure
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,

    /// Generation of the spec last reconciled to Ready
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,
}

impl TenantStatus {
    /// Status with only the state set
    pub fn with_state(state: TenantState) -> Self {
        Self {
            state: Some(state),
            ..Default::default()
        }
    }
}

/// Tenant lifecycle state
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub enum TenantState {
    /// Infrastructure is being created or converged
    #[default]
    Provisioning,
    /// All infrastructure for the tier is in place
    Ready,
    /// The last reconcile failed; a retry is scheduled
    Failed,
    /// Scaled to zero
    Suspended,
    /// Deletion in progress
    Terminating,
}

impl fmt::Display for TenantState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Provisioning => "Provisioning",
            Self::Ready => "Ready",
            Self::Failed => "Failed",
            Self::Suspended => "Suspended",
            Self::Terminating => "Terminating",
        };
        f.write_str(s)
    }
}

// =============================================================================
// Helpers
// =============================================================================

impl Tenant {
    /// Name of this tenant's isolation boundary
    pub fn namespace_name(&self) -> String {
        crate::tenant_namespace(&self.name_any())
    }

    /// Current lifecycle state, if any has been recorded
    pub fn state(&self) -> Option<TenantState> {
        self.status.as_ref().and_then(|s| s.state)
    }

    /// True once a deletion timestamp is set
    pub fn is_deleting(&self) -> bool {
        self.metadata.deletion_timestamp.is_some()
    }

    /// True if the finalizer is attached
    pub fn has_finalizer(&self) -> bool {
        self.finalizers().iter().any(|f| f == crate::TENANT_FINALIZER)
    }

    /// True if status records the current generation as reconciled
    pub fn is_status_current(&self) -> bool {
        self.state() == Some(TenantState::Ready)
            && self.status.as_ref().and_then(|s| s.observed_generation)
                == self.metadata.generation
    }
}
