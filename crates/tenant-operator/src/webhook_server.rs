//! TLS server for the admission webhooks

use std::net::SocketAddr;

use axum_server::tls_rustls::RustlsConfig;
use tenant_admission::webhook_router;
use tracing::info;

use crate::config::WebhookTls;

/// Serve the Tenant admission webhooks until the server fails
///
/// The apiserver only calls webhooks over HTTPS, so there is no plaintext
/// listener.
pub async fn serve_webhook(addr: SocketAddr, tls: WebhookTls) -> anyhow::Result<()> {
    let tls_config = RustlsConfig::from_pem_file(&tls.cert, &tls.key)
        .await
        .map_err(|e| {
            anyhow::anyhow!(
                "TLS config error ({}, {}): {}",
                tls.cert.display(),
                tls.key.display(),
                e
            )
        })?;

    info!(addr = %addr, "Starting admission webhook server");

    axum_server::bind_rustls(addr, tls_config)
        .serve(webhook_router().into_make_service())
        .await
        .map_err(|e| anyhow::anyhow!("Webhook server error: {}", e))?;

    Ok(())
}
