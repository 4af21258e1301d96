//! centpay-agent entry point.

use centpay::{
    agent::{AuditSource, PaymentAgent},
    config::AgentConfig,
};
use clap::Parser;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AgentConfig::parse();

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let memo = config.memo();
    let agent = PaymentAgent::builder()
        .authorizer(config.authorizer()?)
        .resource_url(config.resource_url()?)
        .timeout(config.timeout())
        .build();

    println!("Agent: requesting joke for \"{memo}\"");

    let report = agent
        .run_until(&memo, async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;

    match &report.joke {
        Some(joke) => println!("Joke: {joke}"),
        None => println!("Response: {}", report.body),
    }
    match (&report.audit, report.audit_source) {
        (Some(audit), AuditSource::Authorizer) => println!("Audit (authorizer): {}", audit.summary()),
        (Some(audit), _) => println!("Audit: {}", audit.summary()),
        (None, _) if report.paid => println!("Audit: unavailable"),
        (None, _) => {}
    }

    Ok(())
}
