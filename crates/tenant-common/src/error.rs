//! Error types for the tenant operator
//!
//! Errors are structured with fields to aid debugging in production.
//! Variants carry the tenant name and, where it applies, the provisioning
//! step or field path that failed.

use thiserror::Error;

/// Default context value when no specific context is available
pub const UNKNOWN_CONTEXT: &str = "unknown";

/// Main error type for tenant operations
#[derive(Debug, Error)]
pub enum Error {
    /// Kubernetes API error
    #[error("kubernetes error: {source}")]
    Kube {
        /// The underlying kube-rs error
        #[from]
        source: kube::Error,
    },

    /// Validation error for Tenant specs
    #[error("validation error for {tenant}: {message}")]
    Validation {
        /// Name of the tenant with invalid configuration
        tenant: String,
        /// Description of what's invalid
        message: String,
        /// The invalid field path (e.g., "spec.resources.cpu")
        field: Option<String>,
    },

    /// A provisioning step failed
    #[error("provisioning error [{step}] for {tenant}: {message}")]
    Provision {
        /// Name of the tenant being provisioned
        tenant: String,
        /// Provisioning step (namespace, quota, rbac, network-policy, ...)
        step: String,
        /// Description of what failed
        message: String,
        /// Whether a later reconcile may succeed without a spec change
        retryable: bool,
    },

    /// Serialization/deserialization error
    #[error("serialization error: {message}")]
    Serialization {
        /// Description of what failed
        message: String,
        /// The resource kind being serialized (if known)
        kind: Option<String>,
    },

    /// Internal/operational error
    #[error("internal error [{context}]: {message}")]
    Internal {
        /// Description of what failed
        message: String,
        /// Context where the error occurred (e.g., "reconciler", "drift", "poll_until")
        context: String,
    },
}

impl Error {
    /// Create a validation error with the given message
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            tenant: UNKNOWN_CONTEXT.to_string(),
            message: msg.into(),
            field: None,
        }
    }

    /// Create a validation error with tenant context and field path
    pub fn validation_for_field(
        tenant: impl Into<String>,
        field: impl Into<String>,
        msg: impl Into<String>,
    ) -> Self {
        Self::Validation {
            tenant: tenant.into(),
            message: msg.into(),
            field: Some(field.into()),
        }
    }

    /// Create a retryable provisioning error
    pub fn provision(
        tenant: impl Into<String>,
        step: impl Into<String>,
        msg: impl Into<String>,
    ) -> Self {
        Self::Provision {
            tenant: tenant.into(),
            step: step.into(),
            message: msg.into(),
            retryable: true,
        }
    }

    /// Create a provisioning error that no amount of retrying will fix
    pub fn provision_permanent(
        tenant: impl Into<String>,
        step: impl Into<String>,
        msg: impl Into<String>,
    ) -> Self {
        Self::Provision {
            tenant: tenant.into(),
            step: step.into(),
            message: msg.into(),
            retryable: false,
        }
    }

    /// Create a serialization error with resource kind context
    pub fn serialization_for_kind(kind: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Serialization {
            message: msg.into(),
            kind: Some(kind.into()),
        }
    }

    /// Create an internal error with the given message
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal {
            message: msg.into(),
            context: UNKNOWN_CONTEXT.to_string(),
        }
    }

    /// Create an internal error with context
    pub fn internal_with_context(context: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Internal {
            message: msg.into(),
            context: context.into(),
        }
    }

    /// Check if this error is retryable
    ///
    /// Kubernetes errors are retryable unless the API answered with a 4xx.
    /// Conflicts (409) are the exception: they resolve on the next read.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Kube { source } => match source {
                kube::Error::Api(ae) if ae.code == 409 => true,
                kube::Error::Api(ae) => !(400..500).contains(&ae.code),
                _ => true,
            },
            Error::Validation { .. } => false,
            Error::Provision { retryable, .. } => *retryable,
            Error::Serialization { .. } => false,
            Error::Internal { .. } => true,
        }
    }

    /// Short machine-readable category, used as a metric label
    pub fn kind(&self) -> &'static str {
        match self {
            Error::Kube { .. } => "kube",
            Error::Validation { .. } => "validation",
            Error::Provision { .. } => "provision",
            Error::Serialization { .. } => "serialization",
            Error::Internal { .. } => "internal",
        }
    }

    /// Get the tenant name if this error is associated with a specific tenant
    pub fn tenant(&self) -> Option<&str> {
        match self {
            Error::Validation { tenant, .. } | Error::Provision { tenant, .. } => Some(tenant),
            _ => None,
        }
    }

    /// Get the provisioning step if this error came from one
    pub fn step(&self) -> Option<&str> {
        match self {
            Error::Provision { step, .. } => Some(step),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization {
            message: e.to_string(),
            kind: None,
        }
    }
}

/// Returns true if the error is a Kubernetes 404
pub fn is_not_found(err: &kube::Error) -> bool {
    matches!(err, kube::Error::Api(ae) if ae.code == 404)
}
