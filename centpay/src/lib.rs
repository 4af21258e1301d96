//! # Centpay
//!
//! Pay-per-request HTTP resources, end to end.
//!
//! A seller runs a [`JokeServer`](server::JokeServer): every unauthenticated `GET /joke`
//! is answered with `402 Payment Required` and a single-use invoice. A buyer runs a
//! [`PaymentAgent`](agent::PaymentAgent), which asks an [`Authorizer`](authorizer::Authorizer)
//! for permission to pay, presents the resulting `X-PAYMENT` credential, and receives the
//! joke together with an audit record.
//!
//! ## Related Crates
//!
//! - **`centpay-core`**: invoices, the invoice store, the `X-PAYMENT` codec, wire bodies and
//!   the [`Facilitator`](centpay_core::facilitator::Facilitator) trait.
//! - **`centpay-paywall`**: the framework-agnostic paywall and its axum layer.
//!
//! ## Modules
//!
//! - [`server`]: The axum router, CORS, health endpoint and graceful serving.
//! - [`agent`]: The paying client and its challenge parsing.
//! - [`authorizer`]: Mock, remote policy engine and local signer authorizers.
//! - [`facilitator_client`]: The HTTP facilitator client and the mock/remote selection.
//! - [`config`]: `clap` configuration shared by the `centpay-server` and `centpay-agent`
//!   binaries.
//! - [`jokes`]: The catalog for sale.
//!
//! ## Serving
//!
//! ```rust,no_run
//! use centpay::{config::ServerConfig, server::JokeServer};
//! use centpay_paywall::paywall::PayWall;
//! use clap::Parser;
//!
//! # async fn run() -> anyhow::Result<()> {
//! let config = ServerConfig::parse();
//! let server = JokeServer::builder()
//!     .paywall(
//!         PayWall::builder()
//!             .facilitator(config.facilitator()?)
//!             .terms(config.invoice_terms()?)
//!             .build(),
//!     )
//!     .allowed_origin(config.allowed_origin.clone())
//!     .build();
//!
//! let listener = tokio::net::TcpListener::bind(("0.0.0.0", config.port)).await?;
//! server
//!     .serve(listener, async {
//!         let _ = tokio::signal::ctrl_c().await;
//!     })
//!     .await?;
//! # Ok(())
//! # }
//! ```

pub mod agent;
pub mod authorizer;
pub mod config;
pub mod facilitator_client;
pub mod jokes;
pub mod server;
