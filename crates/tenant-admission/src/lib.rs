//! Admission control for Tenant resources
//!
//! The mutating webhook fills in defaults, the validating webhook rejects
//! malformed specs and unsafe tier downgrades. Both are plain functions over
//! [`tenant_common::crd::Tenant`] wrapped by the axum router in [`webhook`].

#![deny(missing_docs)]

pub mod defaulting;
pub mod error;
pub mod validation;
pub mod webhook;

pub use defaulting::{apply_defaults, default_patch};
pub use error::{AdmissionError, FieldError, FieldErrorKind};
pub use validation::{
    check_tier_transition, validate_create, validate_name, validate_spec, validate_update,
};
pub use webhook::webhook_router;
