//! Tenant operator - wiring for the controller, drift loop and webhook server
//!
//! The reconciliation logic lives in `tenant-controller` and the admission
//! logic in `tenant-admission`; this crate turns them into a running process.

#![deny(missing_docs)]

pub mod config;
pub mod controller_runner;
pub mod crds;
pub mod webhook_server;

pub use config::{OperatorConfig, WebhookTls};
pub use controller_runner::{build_drift_loop, build_tenant_controller, ControllerFuture};
pub use crds::{crd_yaml, ensure_crds_installed};
pub use webhook_server::serve_webhook;
