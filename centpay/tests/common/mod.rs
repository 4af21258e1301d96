#![allow(dead_code)]

use std::net::SocketAddr;

use axum::Router;
use centpay_core::invoice::{AssetInfo, InvoiceTerms};
use url::Url;
use url_macro::url;

pub fn terms(scheme: &str, facilitator_url: Url, resource: Url) -> InvoiceTerms {
    InvoiceTerms::builder()
        .price_cents(1)
        .currency("USDC")
        .network("base-sepolia")
        .scheme(scheme)
        .facilitator_url(facilitator_url)
        .pay_to("demo.seller")
        .seller_name("1¢ Joke Agent")
        .policy_label("daily-$1")
        .asset(AssetInfo {
            address: "0x036CbD53842c5426634e7929541eC2318f3dCF7e".to_string(),
            decimals: 6,
            symbol: "USDC".to_string(),
        })
        .resource(resource)
        .build()
}

pub fn demo_terms() -> InvoiceTerms {
    terms(
        "demo",
        url!("https://facilitator.example.com/"),
        url!("http://localhost:3000/joke"),
    )
}

/// Serve `router` on an ephemeral local port.
pub async fn spawn(router: Router) -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    addr
}
