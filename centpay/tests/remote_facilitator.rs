mod common;

use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering},
    },
    time::Duration,
};

use axum::{
    Json, Router,
    body::Body,
    extract::State,
    http::{HeaderMap, Request, StatusCode},
    response::{IntoResponse, Response},
    routing::post,
};
use centpay::{
    facilitator_client::{ConfiguredFacilitator, FacilitatorAuth, RemoteFacilitator, RemoteFacilitatorError},
    server::JokeServer,
};
use centpay_core::{
    facilitator::{Facilitator, PaymentRequest, SettleResult, VerifyResult},
    header::{self, PaymentCredential},
    types::RequestId,
};
use centpay_paywall::paywall::PayWall;
use chrono::Utc;
use http_body_util::BodyExt;
use serde_json::{Value, json};
use tokio::task::JoinSet;
use tower::ServiceExt;
use url::Url;
use url_macro::url;

const TOKEN: &str = "tok-1";

#[derive(Default)]
struct Authority {
    tokens_issued: AtomicUsize,
    reject: AtomicBool,
    fail_settle: AtomicBool,
    verify_status: AtomicUsize,
    slow_verify: AtomicBool,
    /// `expires_in` handed out with each token; zero means an hour.
    token_lifetime: AtomicU64,
}

fn authorized(headers: &HeaderMap) -> bool {
    headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v == format!("Bearer {TOKEN}"))
}

async fn token(State(authority): State<Arc<Authority>>, body: String) -> Response {
    if !body.contains("grant_type=client_credentials") || !body.contains("client_id=seller") {
        return StatusCode::BAD_REQUEST.into_response();
    }
    authority.tokens_issued.fetch_add(1, Ordering::SeqCst);
    // Widen the window in which concurrent callers could race for a second token.
    tokio::time::sleep(Duration::from_millis(50)).await;
    let expires_in = match authority.token_lifetime.load(Ordering::SeqCst) {
        0 => 3600,
        secs => secs,
    };
    Json(json!({ "access_token": TOKEN, "expires_in": expires_in, "token_type": "Bearer" }))
        .into_response()
}

async fn verify(
    State(authority): State<Arc<Authority>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    if !authorized(&headers) {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    if authority.slow_verify.load(Ordering::SeqCst) {
        tokio::time::sleep(Duration::from_secs(2)).await;
    }
    let status = authority.verify_status.load(Ordering::SeqCst);
    if status != 0 {
        let status = StatusCode::from_u16(status as u16).unwrap();
        return (status, "authority unavailable").into_response();
    }
    assert_eq!(body["x402Version"], 1);
    assert_eq!(body["paymentRequirements"]["maxAmountRequired"], "10000");

    if authority.reject.load(Ordering::SeqCst) {
        Json(json!({ "isValid": false, "invalidReason": "insufficient_funds", "payer": "0xbuyer" }))
            .into_response()
    } else {
        Json(json!({ "isValid": true, "payer": "0xbuyer" })).into_response()
    }
}

async fn settle(State(authority): State<Arc<Authority>>, headers: HeaderMap) -> Response {
    if !authorized(&headers) {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    if authority.fail_settle.load(Ordering::SeqCst) {
        Json(json!({ "success": false, "errorReason": "chain_congested" })).into_response()
    } else {
        Json(json!({
            "success": true,
            "transaction": "0xfeed",
            "payer": "0xbuyer",
            "network": "base-sepolia"
        }))
        .into_response()
    }
}

async fn authority() -> (Arc<Authority>, Url) {
    let state = Arc::new(Authority::default());
    let router = Router::new()
        .route("/oauth/token", post(token))
        .route("/x402/facilitator/verify", post(verify))
        .route("/x402/facilitator/settle", post(settle))
        .with_state(state.clone());
    let addr = common::spawn(router).await;
    let base = Url::parse(&format!("http://{addr}/")).unwrap();
    (state, base)
}

fn remote(base: &Url) -> RemoteFacilitator {
    RemoteFacilitator::new(
        base.join("x402/facilitator").unwrap(),
        FacilitatorAuth::ClientCredentials {
            token_url: base.join("oauth/token").unwrap(),
            client_id: "seller".to_string(),
            client_secret: "s3cret".to_string(),
            scope: None,
        },
    )
    .unwrap()
}

fn payment_request(base: &Url) -> PaymentRequest {
    let terms = common::terms(
        "exact",
        base.join("x402/facilitator").unwrap(),
        url!("http://localhost:3000/joke"),
    );
    let invoice = terms.issue(&RequestId::generate(), Utc::now()).unwrap();
    let credential = PaymentCredential::x402(json!({
        "payload": { "authorization": { "nonce": invoice.nonce.as_str() } }
    }))
    .unwrap();
    PaymentRequest::new(credential, invoice)
}

#[tokio::test]
async fn concurrent_calls_share_one_token() {
    let (state, base) = authority().await;
    let facilitator = remote(&base);
    let request = payment_request(&base);

    let mut calls = JoinSet::new();
    for _ in 0..8 {
        let facilitator = facilitator.clone();
        let request = request.clone();
        calls.spawn(async move { facilitator.verify(&request).await });
    }
    while let Some(result) = calls.join_next().await {
        assert!(result.unwrap().unwrap().is_valid());
    }

    assert_eq!(state.tokens_issued.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn verify_and_settle_are_mapped() {
    let (state, base) = authority().await;
    let facilitator = remote(&base);
    let request = payment_request(&base);

    assert_eq!(facilitator.verify(&request).await.unwrap(), VerifyResult::valid("0xbuyer"));
    match facilitator.settle(&request).await.unwrap() {
        SettleResult::Success(success) => {
            assert_eq!(success.transaction, "0xfeed");
            assert_eq!(success.network, "base-sepolia");
        }
        other => panic!("unexpected settlement: {other:?}"),
    }

    state.reject.store(true, Ordering::SeqCst);
    assert_eq!(
        facilitator.verify(&request).await.unwrap(),
        VerifyResult::invalid("insufficient_funds", Some("0xbuyer".to_string()))
    );
}

#[tokio::test]
async fn error_status_surfaces_as_error() {
    let (state, base) = authority().await;
    state.verify_status.store(503, Ordering::SeqCst);
    let facilitator = remote(&base);

    let err = facilitator.verify(&payment_request(&base)).await.unwrap_err();
    assert!(matches!(err, RemoteFacilitatorError::Status { status: 503, .. }));
}

#[tokio::test]
async fn token_failure_surfaces_as_token_error() {
    let (_, base) = authority().await;
    let facilitator = RemoteFacilitator::new(
        base.join("x402/facilitator").unwrap(),
        FacilitatorAuth::ClientCredentials {
            token_url: base.join("oauth/token").unwrap(),
            client_id: "stranger".to_string(),
            client_secret: "nope".to_string(),
            scope: None,
        },
    )
    .unwrap();

    let err = facilitator.verify(&payment_request(&base)).await.unwrap_err();
    assert!(matches!(err, RemoteFacilitatorError::Token(_)));
}

#[tokio::test]
async fn token_near_expiry_is_refreshed() {
    let (state, base) = authority().await;
    // Inside the refresh margin from the moment it is issued.
    state.token_lifetime.store(5, Ordering::SeqCst);
    let facilitator = remote(&base);
    let request = payment_request(&base);

    assert!(facilitator.verify(&request).await.unwrap().is_valid());
    assert!(facilitator.verify(&request).await.unwrap().is_valid());
    assert_eq!(state.tokens_issued.load(Ordering::SeqCst), 2);

    state.token_lifetime.store(6, Ordering::SeqCst);
    assert!(facilitator.verify(&request).await.unwrap().is_valid());
    assert!(facilitator.verify(&request).await.unwrap().is_valid());
    assert_eq!(state.tokens_issued.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn api_key_is_sent_as_bearer() {
    let (state, base) = authority().await;
    let facilitator = RemoteFacilitator::new(
        base.join("x402/facilitator").unwrap(),
        FacilitatorAuth::ApiKey(TOKEN.to_string()),
    )
    .unwrap();

    assert!(facilitator.verify(&payment_request(&base)).await.unwrap().is_valid());
    assert_eq!(state.tokens_issued.load(Ordering::SeqCst), 0);

    let stranger = RemoteFacilitator::new(
        base.join("x402/facilitator").unwrap(),
        FacilitatorAuth::ApiKey("wrong".to_string()),
    )
    .unwrap();
    let err = stranger.verify(&payment_request(&base)).await.unwrap_err();
    assert!(matches!(err, RemoteFacilitatorError::Status { status: 401, .. }));
}

fn impatient(base: &Url) -> RemoteFacilitator {
    RemoteFacilitator::with_timeout(
        base.join("x402/facilitator").unwrap(),
        FacilitatorAuth::ApiKey(TOKEN.to_string()),
        Duration::from_millis(100),
    )
    .unwrap()
}

#[tokio::test]
async fn slow_facilitator_times_out() {
    let (state, base) = authority().await;
    state.slow_verify.store(true, Ordering::SeqCst);

    let err = impatient(&base)
        .verify(&payment_request(&base))
        .await
        .unwrap_err();
    assert!(matches!(err, RemoteFacilitatorError::Timeout));
}

async fn joke_router(base: &Url) -> Router {
    joke_router_with(base, remote(base))
}

fn joke_router_with(base: &Url, facilitator: RemoteFacilitator) -> Router {
    let terms = common::terms(
        "exact",
        base.join("x402/facilitator").unwrap(),
        url!("http://localhost:3000/joke"),
    );
    JokeServer::builder()
        .paywall(
            PayWall::builder()
                .facilitator(ConfiguredFacilitator::Remote(facilitator))
                .terms(terms)
                .build(),
        )
        .build()
        .router()
}

async fn get(router: &Router, payment: Option<&str>) -> (StatusCode, Value) {
    let mut request = Request::builder().uri("/joke");
    if let Some(payment) = payment {
        request = request.header("X-PAYMENT", payment);
    }
    let response = router
        .clone()
        .oneshot(request.body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    (status, serde_json::from_slice(&bytes).unwrap())
}

fn x402_header(nonce: &str) -> String {
    let credential = PaymentCredential::x402(json!({
        "x402Version": 1,
        "scheme": "exact",
        "payload": { "authorization": { "nonce": nonce } }
    }))
    .unwrap();
    header::encode(&credential).unwrap()
}

#[tokio::test]
async fn paywall_settles_through_remote_facilitator() {
    let (_, base) = authority().await;
    let router = joke_router(&base).await;

    let (_, challenge) = get(&router, None).await;
    let nonce = challenge["invoice_nonce"].as_str().unwrap();

    let (status, body) = get(&router, Some(&x402_header(nonce))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["audit"]["tx"], "0xfeed");
    assert_eq!(body["audit"]["payer"], "0xbuyer");
}

#[tokio::test]
async fn facilitator_rejection_is_402() {
    let (state, base) = authority().await;
    state.reject.store(true, Ordering::SeqCst);
    let router = joke_router(&base).await;

    let (_, challenge) = get(&router, None).await;
    let nonce = challenge["invoice_nonce"].as_str().unwrap();

    let (status, body) = get(&router, Some(&x402_header(nonce))).await;
    assert_eq!(status, StatusCode::PAYMENT_REQUIRED);
    assert_eq!(body["reason"], "facilitator_rejected");
}

#[tokio::test]
async fn settlement_failure_is_502_and_burns_invoice() {
    let (state, base) = authority().await;
    state.fail_settle.store(true, Ordering::SeqCst);
    let router = joke_router(&base).await;

    let (_, challenge) = get(&router, None).await;
    let header = x402_header(challenge["invoice_nonce"].as_str().unwrap());

    let (status, body) = get(&router, Some(&header)).await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert_eq!(body["error"], "settlement_failed");

    state.fail_settle.store(false, Ordering::SeqCst);
    let (status, body) = get(&router, Some(&header)).await;
    assert_eq!(status, StatusCode::PAYMENT_REQUIRED);
    assert_eq!(body["reason"], "unknown_invoice");
}

#[tokio::test]
async fn facilitator_timeout_is_402() {
    let (state, base) = authority().await;
    state.slow_verify.store(true, Ordering::SeqCst);
    let router = joke_router_with(&base, impatient(&base));

    let (_, challenge) = get(&router, None).await;
    let nonce = challenge["invoice_nonce"].as_str().unwrap();

    let (status, body) = get(&router, Some(&x402_header(nonce))).await;
    assert_eq!(status, StatusCode::PAYMENT_REQUIRED);
    assert_eq!(body["reason"], "facilitator_error");
}
