//! centpay-server entry point.

use anyhow::Context;
use centpay::{config::ServerConfig, server::JokeServer};
use centpay_paywall::paywall::PayWall;
use clap::Parser;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = ServerConfig::parse();

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    tracing::info!("centpay-server v{}", env!("CARGO_PKG_VERSION"));

    let facilitator = config.facilitator()?;
    let terms = config.invoice_terms()?;
    tracing::info!(
        price = %terms.price().amount,
        currency = %terms.currency,
        network = %terms.network,
        mock_facilitator = config.mock_facilitator,
        "Pricing configured"
    );

    let server = JokeServer::builder()
        .paywall(
            PayWall::builder()
                .facilitator(facilitator)
                .terms(terms)
                .build(),
        )
        .allowed_origin(config.allowed_origin.clone())
        .path(config.path.clone())
        .sweep_interval(config.sweep_interval())
        .build();

    let listener = tokio::net::TcpListener::bind(("0.0.0.0", config.port))
        .await
        .with_context(|| format!("failed to bind port {}", config.port))?;

    server
        .serve(listener, async {
            if let Err(err) = tokio::signal::ctrl_c().await {
                tracing::error!("Failed to listen for Ctrl-C: {err}");
                std::future::pending::<()>().await;
            }
            tracing::info!("Shutdown requested");
        })
        .await?;

    Ok(())
}
