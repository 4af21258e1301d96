use axum::{
    Extension, Json, Router,
    body::Body,
    http::{Request, StatusCode},
    routing::get,
};
use centpay_core::{
    facilitator::MockFacilitator,
    invoice::{AssetInfo, InvoiceTerms},
};
use centpay_paywall::{paywall::PayWall, processor::PaymentState};
use http_body_util::BodyExt;
use serde_json::{Value, json};
use tower::ServiceExt;
use url_macro::url;

fn paywall() -> PayWall<MockFacilitator> {
    PayWall::builder()
        .facilitator(MockFacilitator::builder().payer("0xbuyer").build())
        .terms(
            InvoiceTerms::builder()
                .price_cents(25)
                .currency("USDC")
                .network("base-sepolia")
                .facilitator_url(url!("https://facilitator.example.com/"))
                .pay_to("demo.seller")
                .seller_name("Joke seller")
                .policy_label("daily-$1")
                .asset(AssetInfo {
                    address: "0xasset".to_string(),
                    decimals: 6,
                    symbol: "USDC".to_string(),
                })
                .resource(url!("http://localhost:3000/premium"))
                .build(),
        )
        .build()
}

async fn premium(Extension(state): Extension<PaymentState>) -> Json<Value> {
    Json(json!({
        "spent": state.invoice.price.amount,
        "payer": state.verified.map(|v| v.payer),
        "tx": state.settled.map(|s| s.transaction),
    }))
}

fn app() -> Router {
    Router::new()
        .route("/premium", get(premium).route_layer(paywall()))
        .route("/free", get(|| async { "free" }))
}

async fn call(app: &Router, uri: &str, payment: Option<&str>) -> (StatusCode, Option<String>, Value) {
    let mut request = Request::get(uri).header("x-request-id", "req-7");
    if let Some(payment) = payment {
        request = request.header("x-payment", payment);
    }
    let response = app
        .clone()
        .oneshot(request.body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let request_id = response
        .headers()
        .get("x-request-id")
        .map(|v| v.to_str().unwrap().to_string());
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, request_id, body)
}

#[tokio::test]
async fn layer_gates_only_its_route() {
    let app = app();

    let (status, _, _) = call(&app, "/free", None).await;
    assert_eq!(status, StatusCode::OK);

    let (status, request_id, body) = call(&app, "/premium", None).await;
    assert_eq!(status, StatusCode::PAYMENT_REQUIRED);
    assert_eq!(request_id.as_deref(), Some("req-7"));
    assert_eq!(body["price"]["amount"], "0.25");
    assert_eq!(body["request_id"], "req-7");
}

#[tokio::test]
async fn handler_sees_payment_state() {
    let app = app();
    let (_, _, challenge) = call(&app, "/premium", None).await;
    let nonce = challenge["invoice_nonce"].as_str().unwrap();

    let (status, request_id, body) =
        call(&app, "/premium", Some(&format!("DEMO {nonce}"))).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(request_id.as_deref(), Some("req-7"));
    assert_eq!(body["spent"], "0.25");
    assert_eq!(body["payer"], "0xbuyer");
    assert!(body["tx"].as_str().unwrap().starts_with("mock-tx-"));
}

#[tokio::test]
async fn malformed_header_is_rejected_not_crashed() {
    let app = app();
    let (status, _, body) = call(&app, "/premium", Some("demo")).await;

    assert_eq!(status, StatusCode::PAYMENT_REQUIRED);
    assert_eq!(body["error"], "payment_invalid");
    assert_eq!(body["reason"], "invalid_header");
}
