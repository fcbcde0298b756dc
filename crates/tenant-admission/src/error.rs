//! Admission rejection types
//!
//! Field errors mirror the apiserver's own `field.Error` list so `kubectl`
//! renders them the same way as built-in validation failures.

use std::fmt;

use kube::core::response::{StatusCause, StatusDetails};
use kube::core::Status;
use thiserror::Error;

/// Category of a single field error
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FieldErrorKind {
    /// The field must be set
    Required,
    /// The value does not match the expected format
    Invalid,
    /// The value is not one of the allowed values
    NotSupported,
}

impl FieldErrorKind {
    /// Machine-readable reason used in `StatusCause.reason`
    pub fn reason(&self) -> &'static str {
        match self {
            Self::Required => "FieldValueRequired",
            Self::Invalid => "FieldValueInvalid",
            Self::NotSupported => "FieldValueNotSupported",
        }
    }

    fn describe(&self) -> &'static str {
        match self {
            Self::Required => "Required value",
            Self::Invalid => "Invalid value",
            Self::NotSupported => "Unsupported value",
        }
    }
}

/// A validation failure attributed to one field
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FieldError {
    /// Field path, e.g. `spec.resources.cpu`
    pub field: String,
    /// Failure category
    pub kind: FieldErrorKind,
    /// Offending value, if there was one
    pub value: Option<String>,
    /// Human-readable detail
    pub detail: String,
}

impl FieldError {
    /// The field is missing
    pub fn required(field: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            kind: FieldErrorKind::Required,
            value: None,
            detail: detail.into(),
        }
    }

    /// The value is malformed
    pub fn invalid(
        field: impl Into<String>,
        value: impl Into<String>,
        detail: impl Into<String>,
    ) -> Self {
        Self {
            field: field.into(),
            kind: FieldErrorKind::Invalid,
            value: Some(value.into()),
            detail: detail.into(),
        }
    }

    /// The value is outside the supported set
    pub fn not_supported(field: impl Into<String>, value: impl Into<String>, supported: &[&str]) -> Self {
        let supported = supported
            .iter()
            .map(|s| format!("\"{s}\""))
            .collect::<Vec<_>>()
            .join(", ");
        Self {
            field: field.into(),
            kind: FieldErrorKind::NotSupported,
            value: Some(value.into()),
            detail: format!("supported values: {supported}"),
        }
    }
}

impl fmt::Display for FieldError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.kind.describe())?;
        if let Some(value) = &self.value {
            write!(f, ": \"{value}\"")?;
        }
        write!(f, ": {}", self.detail)
    }
}

/// Why an admission request was rejected
#[derive(Debug, Error, PartialEq)]
pub enum AdmissionError {
    /// The request or its embedded object could not be decoded as a Tenant
    #[error("malformed admission request: {0}")]
    Malformed(String),

    /// The transition from the old object to the new one is not allowed
    #[error("{field}: Forbidden: {message}")]
    Forbidden {
        /// Field whose change is forbidden
        field: String,
        /// Explanation, including the risk of proceeding
        message: String,
    },

    /// One or more fields failed validation
    #[error("{}", join_field_errors(.0))]
    Invalid(Vec<FieldError>),
}

fn join_field_errors(errors: &[FieldError]) -> String {
    match errors {
        [single] => single.to_string(),
        many => format!(
            "[{}]",
            many.iter().map(|e| e.to_string()).collect::<Vec<_>>().join(", ")
        ),
    }
}

impl AdmissionError {
    /// Field errors carried by this rejection (empty unless `Invalid`)
    pub fn field_errors(&self) -> &[FieldError] {
        match self {
            Self::Invalid(errors) => errors,
            _ => &[],
        }
    }

    /// Render as an apiserver `Status` for the admission response
    pub fn to_status(&self, name: &str) -> Status {
        let (code, reason) = match self {
            Self::Malformed(_) => (400, "BadRequest"),
            Self::Forbidden { .. } => (403, "Forbidden"),
            Self::Invalid(_) => (422, "Invalid"),
        };
        let message = match self {
            Self::Malformed(_) => self.to_string(),
            _ => format!("Tenant.platform.io \"{name}\" is invalid: {self}"),
        };
        let causes = match self {
            Self::Malformed(_) => vec![],
            Self::Forbidden { field, message } => vec![StatusCause {
                reason: "FieldValueForbidden".to_string(),
                message: message.clone(),
                field: field.clone(),
            }],
            Self::Invalid(errors) => errors
                .iter()
                .map(|e| StatusCause {
                    reason: e.kind.reason().to_string(),
                    message: e.to_string(),
                    field: e.field.clone(),
                })
                .collect(),
        };
        Status::failure(&message, reason)
            .with_code(code)
            .with_details(StatusDetails {
                name: name.to_string(),
                group: "platform.io".to_string(),
                kind: "Tenant".to_string(),
                uid: String::new(),
                causes,
                retry_after_seconds: 0,
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn field_error_renders_like_apiserver() {
        let err = FieldError::required("spec.owner", "owner email is required");
        assert_eq!(err.to_string(), "spec.owner: Required value: owner email is required");

        let err = FieldError::not_supported("spec.tier", "Platinum", &["Bronze", "Silver", "Gold"]);
        assert_eq!(
            err.to_string(),
            "spec.tier: Unsupported value: \"Platinum\": supported values: \"Bronze\", \"Silver\", \"Gold\""
        );
    }

    #[test]
    fn invalid_status_lists_every_cause() {
        let err = AdmissionError::Invalid(vec![
            FieldError::required("spec.owner", "owner email is required"),
            FieldError::invalid("spec.resources.cpu", "lots", "must be a CPU quantity"),
        ]);
        let status = err.to_status("acme");
        assert_eq!(status.code, 422);
        assert_eq!(status.reason, "Invalid");
        assert!(status.message.starts_with("Tenant.platform.io \"acme\" is invalid: ["));
        let causes = status.details.map(|d| d.causes).unwrap_or_default();
        assert_eq!(causes.len(), 2);
        assert_eq!(causes[1].field, "spec.resources.cpu");
        assert_eq!(causes[1].reason, "FieldValueInvalid");
    }

    #[test]
    fn forbidden_status_is_distinct_from_invalid() {
        let err = AdmissionError::Forbidden {
            field: "spec.tier".to_string(),
            message: "unsafe tier downgrade".to_string(),
        };
        let status = err.to_status("acme");
        assert_eq!(status.code, 403);
        assert_eq!(status.reason, "Forbidden");
        assert!(err.field_errors().is_empty());
    }

    #[test]
    fn malformed_status_has_no_causes() {
        let status = AdmissionError::Malformed("missing spec".to_string()).to_status("");
        assert_eq!(status.code, 400);
        assert!(status.details.map(|d| d.causes.is_empty()).unwrap_or(true));
    }
}
