//! # Centpay Paywall
//!
//! A framework-agnostic HTTP paywall for the Centpay pay-per-request protocol.
//!
//! This crate provides [`PayWall`](paywall::PayWall), which protects an HTTP resource
//! behind single-use invoices. A request without `X-PAYMENT` is answered with
//! `402 Payment Required` and a fresh invoice; a request presenting a credential for an
//! outstanding invoice consumes it, is verified and settled through a
//! [`Facilitator`](centpay_core::facilitator::Facilitator), and then reaches the resource.
//!
//! ## Quick Start
//!
//! ```rust
//! use std::time::Duration;
//!
//! use url_macro::url;
//! use centpay_core::{
//!     facilitator::MockFacilitator,
//!     invoice::{AssetInfo, InvoiceTerms},
//! };
//! use centpay_paywall::paywall::PayWall;
//!
//! let paywall = PayWall::builder()
//!     .facilitator(MockFacilitator::default())
//!     .terms(
//!         InvoiceTerms::builder()
//!             .price_cents(1)
//!             .currency("USDC")
//!             .network("base-sepolia")
//!             .facilitator_url(url!("https://facilitator.example.com/"))
//!             .pay_to("demo.seller")
//!             .seller_name("1¢ Joke Agent")
//!             .policy_label("daily-$1")
//!             .asset(AssetInfo {
//!                 address: "0x036CbD53842c5426634e7929541eC2318f3dCF7e".to_string(),
//!                 decimals: 6,
//!                 symbol: "USDC".to_string(),
//!             })
//!             .resource(url!("https://example.com/joke"))
//!             .ttl(Duration::from_secs(120))
//!             .build(),
//!     )
//!     .build();
//! # let _ = paywall;
//! ```
//!
//! ## Modules
//!
//! - [`paywall`]: The main [`PayWall`](paywall::PayWall) struct and payment flow logic.
//! - [`processor`]: [`RequestProcessor`](processor::RequestProcessor) and
//!   [`PaymentState`](processor::PaymentState).
//! - [`errors`]: HTTP error responses for challenges, rejections and settlement failures.
//! - [`sweeper`]: The background task dropping expired invoices.
//! - `axum`: `tower::Layer` integration (feature `axum`).
//!
//! ## Error Handling
//!
//! [`ErrorResponse`](errors::ErrorResponse) implements `IntoResponse` for axum:
//!
//! - `402 Payment Required`: no credential (a challenge body), or a rejected credential.
//! - `502 Bad Gateway`: the facilitator failed to settle a verified payment.
//! - `500 Internal Server Error`: the invoice could not be minted or priced.

pub mod errors;
pub mod paywall;
pub mod processor;
pub mod sweeper;

#[cfg(feature = "axum")]
pub mod axum;
