//! Tenant Operator - provisions isolated tenant environments from Tenant CRDs

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tenant_common::kube_utils::create_client;
use tenant_common::telemetry::{init_telemetry, TelemetryConfig};
use tenant_controller::{Context, TenantLocks};
use tenant_operator::{
    build_drift_loop, build_tenant_controller, crd_yaml, ensure_crds_installed, serve_webhook,
    OperatorConfig,
};

/// Tenant operator - CRD-driven provisioning of isolated tenant environments
#[derive(Parser, Debug)]
#[command(name = "tenant-operator", version, about, long_about = None)]
struct Cli {
    /// Generate CRD manifests and exit
    #[arg(long)]
    crd: bool,

    #[command(flatten)]
    config: OperatorConfig,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run as controller (default mode)
    ///
    /// Reconciles Tenants, sweeps network policies for drift and, unless
    /// disabled, serves the admission webhooks in the same process.
    Controller,
    /// Serve only the admission webhooks
    Webhook,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // The webhook server and the kube client both need a process-wide provider
    if let Err(e) = rustls::crypto::aws_lc_rs::default_provider().install_default() {
        eprintln!(
            "CRITICAL: Failed to install aws-lc-rs crypto provider: {:?}. \
             The operator cannot serve or call TLS endpoints without it.",
            e
        );
        std::process::exit(1);
    }

    let cli = Cli::parse();

    if cli.crd {
        println!("{}", crd_yaml()?);
        return Ok(());
    }

    init_telemetry(TelemetryConfig::default())
        .map_err(|e| anyhow::anyhow!("Failed to initialize telemetry: {}", e))?;

    match cli.command {
        Some(Commands::Controller) | None => run_controller(cli.config).await,
        Some(Commands::Webhook) => run_webhook(cli.config).await,
    }
}

async fn run_controller(config: OperatorConfig) -> anyhow::Result<()> {
    tracing::info!("Tenant controller starting...");

    // Fail before touching the cluster if the webhook cannot be served
    let webhook_tls = if config.disable_webhook {
        None
    } else {
        Some(config.require_webhook_tls()?)
    };

    let client = create_client(config.kubeconfig.as_deref())
        .await
        .map_err(|e| anyhow::anyhow!("Failed to create Kubernetes client: {}", e))?;

    // Operator installs its own CRD on startup
    ensure_crds_installed(&client).await?;

    let locks = Arc::new(TenantLocks::new());
    let ctx = Arc::new(
        Context::builder(client.clone())
            .locks(locks)
            .settings(config.settings())
            .build(),
    );

    let (controller, store) = build_tenant_controller(client, ctx.clone(), config.concurrency);
    let drift_loop = build_drift_loop(ctx, store, config.drift_interval());

    let webhook: Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send>> = match webhook_tls {
        Some(tls) => Box::pin(serve_webhook(config.webhook_addr, tls)),
        None => {
            tracing::info!("Admission webhook disabled");
            Box::pin(std::future::pending())
        }
    };

    tokio::select! {
        _ = controller => {
            tracing::info!("Tenant controller completed");
        }
        _ = drift_loop => {
            tracing::info!("Drift loop completed");
        }
        result = webhook => {
            result?;
            tracing::info!("Webhook server completed");
        }
    }

    tracing::info!("Tenant controller shutting down");
    Ok(())
}

async fn run_webhook(config: OperatorConfig) -> anyhow::Result<()> {
    let tls = config.require_webhook_tls()?;
    tokio::select! {
        result = serve_webhook(config.webhook_addr, tls) => result,
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Webhook server shutting down");
            Ok(())
        }
    }
}
