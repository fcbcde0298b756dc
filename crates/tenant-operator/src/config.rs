//! Operator configuration
//!
//! Every option can be given as a flag or through the environment, so the
//! same binary runs from a shell or from a Deployment manifest.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use clap::Args;
use tenant_common::OPERATOR_NAMESPACE;
use tenant_controller::context::DEFAULT_READINESS_POLL_INTERVAL;
use tenant_controller::Settings;

/// Runtime options shared by all subcommands
#[derive(Args, Debug, Clone)]
pub struct OperatorConfig {
    /// Maximum number of tenants reconciled at once
    #[arg(
        long,
        env = "TENANT_CONCURRENCY",
        default_value_t = 3,
        value_parser = clap::value_parser!(u16).range(1..),
        global = true
    )]
    pub concurrency: u16,

    /// Seconds between network policy drift sweeps
    #[arg(
        long,
        env = "TENANT_DRIFT_INTERVAL_SECS",
        default_value_t = 60,
        value_parser = clap::value_parser!(u64).range(1..),
        global = true
    )]
    pub drift_interval_secs: u64,

    /// Seconds to wait for a companion control plane before degrading
    #[arg(long, env = "TENANT_READINESS_TIMEOUT_SECS", default_value_t = 300, global = true)]
    pub readiness_timeout_secs: u64,

    /// Namespace holding snapshots, pull secrets and platform config
    #[arg(long, env = "TENANT_OPERATOR_NAMESPACE", default_value = OPERATOR_NAMESPACE, global = true)]
    pub operator_namespace: String,

    /// Listen address of the admission webhook server
    #[arg(long, env = "TENANT_WEBHOOK_ADDR", default_value = "0.0.0.0:9443", global = true)]
    pub webhook_addr: SocketAddr,

    /// PEM certificate chain for the webhook server
    #[arg(long, env = "TENANT_TLS_CERT", requires = "tls_key", global = true)]
    pub tls_cert: Option<PathBuf>,

    /// PEM private key for the webhook server
    #[arg(long, env = "TENANT_TLS_KEY", requires = "tls_cert", global = true)]
    pub tls_key: Option<PathBuf>,

    /// Run the controller without serving admission webhooks
    #[arg(long, env = "TENANT_DISABLE_WEBHOOK", global = true)]
    pub disable_webhook: bool,

    /// Kubeconfig to use instead of in-cluster or default discovery
    #[arg(long, global = true)]
    pub kubeconfig: Option<PathBuf>,
}

/// Certificate and key locations for the webhook server
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebhookTls {
    /// PEM certificate chain
    pub cert: PathBuf,
    /// PEM private key
    pub key: PathBuf,
}

impl OperatorConfig {
    /// Reconcile tunables derived from the flags
    pub fn settings(&self) -> Settings {
        Settings {
            operator_namespace: self.operator_namespace.clone(),
            readiness_timeout: Duration::from_secs(self.readiness_timeout_secs),
            readiness_poll_interval: DEFAULT_READINESS_POLL_INTERVAL,
        }
    }

    /// Interval between drift sweeps
    pub fn drift_interval(&self) -> Duration {
        Duration::from_secs(self.drift_interval_secs)
    }

    /// TLS material for the webhook, if both paths were given
    pub fn webhook_tls(&self) -> Option<WebhookTls> {
        match (&self.tls_cert, &self.tls_key) {
            (Some(cert), Some(key)) => Some(WebhookTls {
                cert: cert.clone(),
                key: key.clone(),
            }),
            _ => None,
        }
    }

    /// TLS material for a run that must serve the webhook
    pub fn require_webhook_tls(&self) -> anyhow::Result<WebhookTls> {
        self.webhook_tls().ok_or_else(|| {
            anyhow::anyhow!(
                "serving admission webhooks requires --tls-cert and --tls-key \
                 (or pass --disable-webhook to the controller)"
            )
        })
    }
}
