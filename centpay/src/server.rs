//! The paywalled joke server.
//!
//! ```text
//! GET     /healthz  -> 200 {ok, uptime}
//! GET     /joke     -> 402 challenge | 402 rejected | 502 settlement_failed | 200 {joke, audit}
//! OPTIONS /joke     -> 204 preflight
//! *                 -> 404 {error: "not_found"}
//! ```

use std::{sync::Arc, time::Duration};

use axum::{
    Extension, Json, Router,
    extract::{Request, State},
    http::{
        HeaderValue, StatusCode,
        header::{
            ACCESS_CONTROL_ALLOW_CREDENTIALS, ACCESS_CONTROL_ALLOW_HEADERS,
            ACCESS_CONTROL_ALLOW_METHODS, ACCESS_CONTROL_ALLOW_ORIGIN,
            ACCESS_CONTROL_EXPOSE_HEADERS,
        },
    },
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::get,
};
use bon::Builder;
use centpay_core::{facilitator::Facilitator, transport::AuditRecord};
use centpay_paywall::{
    paywall::PayWall,
    processor::PaymentState,
    sweeper::{DEFAULT_SWEEP_INTERVAL, InvoiceSweeper},
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::{net::TcpListener, time::Instant};
use tower_http::trace::TraceLayer;

use crate::jokes::random_joke;

pub const ALLOWED_METHODS: &str = "GET,OPTIONS";
pub const ALLOWED_HEADERS: &str = "Content-Type, X-PAYMENT, X-Request-Id";
pub const EXPOSED_HEADERS: &str = "X-Request-Id";

/// Body of a paid `GET /joke`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JokeResponse {
    pub joke: String,
    pub audit: AuditRecord,
}

impl JokeResponse {
    pub fn new(joke: impl Into<String>, payment: &PaymentState) -> Self {
        let invoice = &payment.invoice;
        let payer = payment
            .settled
            .as_ref()
            .map(|s| s.payer.clone())
            .or_else(|| payment.verified.as_ref().map(|v| v.payer.clone()));

        JokeResponse {
            joke: joke.into(),
            audit: AuditRecord::builder()
                .spent(invoice.price.amount.clone())
                .currency(invoice.price.currency.clone())
                .maybe_tx(payment.settled.as_ref().map(|s| s.transaction.clone()))
                .policy(invoice.policy_label.clone())
                .vendor(invoice.seller_name.clone())
                .maybe_payer(payer)
                .network(
                    payment
                        .settled
                        .as_ref()
                        .map_or_else(|| invoice.network.clone(), |s| s.network.clone()),
                )
                .build(),
        }
    }
}

#[derive(Debug, Clone)]
struct AppState {
    started: Instant,
}

#[derive(Debug, Clone)]
struct CorsPolicy {
    origin: HeaderValue,
}

/// HTTP front end selling one joke per payment.
#[derive(Builder, Debug, Clone)]
pub struct JokeServer<F: Facilitator> {
    pub paywall: PayWall<F>,
    /// Value of `Access-Control-Allow-Origin`.
    #[builder(into, default = String::from("*"))]
    pub allowed_origin: String,
    /// Path of the gated resource.
    #[builder(into, default = String::from("/joke"))]
    pub path: String,
    #[builder(default = DEFAULT_SWEEP_INTERVAL)]
    pub sweep_interval: Duration,
}

impl<F> JokeServer<F>
where
    F: Facilitator + Clone + Send + Sync + 'static,
{
    pub fn router(&self) -> Router {
        let origin = HeaderValue::from_str(&self.allowed_origin).unwrap_or_else(|_| {
            tracing::warn!(origin = %self.allowed_origin, "Invalid allowed origin, using *");
            HeaderValue::from_static("*")
        });
        let cors = Arc::new(CorsPolicy { origin });

        Router::new()
            .route("/healthz", get(healthz))
            .route(
                &self.path,
                get(joke)
                    .route_layer(self.paywall.clone())
                    .options(preflight),
            )
            .fallback(not_found)
            .layer(middleware::from_fn_with_state(cors, cors_headers))
            .layer(TraceLayer::new_for_http())
            .with_state(AppState {
                started: Instant::now(),
            })
    }

    /// Serve until `shutdown` resolves, sweeping expired invoices in the background.
    pub async fn serve(
        self,
        listener: TcpListener,
        shutdown: impl Future<Output = ()> + Send + 'static,
    ) -> std::io::Result<()> {
        let sweeper = InvoiceSweeper::spawn(self.paywall.store.clone(), self.sweep_interval);
        let router = self.router();

        if let Ok(addr) = listener.local_addr() {
            tracing::info!(%addr, path = %self.path, "Joke server listening");
        }

        let result = axum::serve(listener, router)
            .with_graceful_shutdown(shutdown)
            .await;

        sweeper.shutdown().await;
        tracing::info!("Joke server stopped");
        result
    }
}

async fn healthz(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(json!({
        "ok": true,
        "uptime": state.started.elapsed().as_secs_f64(),
    }))
}

async fn joke(Extension(payment): Extension<PaymentState>) -> Json<JokeResponse> {
    let response = JokeResponse::new(random_joke(), &payment);
    tracing::info!(
        request_id = %payment.request_id,
        nonce = %payment.invoice.nonce,
        transaction = ?response.audit.tx,
        "Joke delivered"
    );
    Json(response)
}

async fn preflight() -> impl IntoResponse {
    (
        StatusCode::NO_CONTENT,
        [
            (ACCESS_CONTROL_ALLOW_METHODS, ALLOWED_METHODS),
            (ACCESS_CONTROL_ALLOW_HEADERS, ALLOWED_HEADERS),
        ],
    )
}

async fn not_found() -> impl IntoResponse {
    (StatusCode::NOT_FOUND, Json(json!({ "error": "not_found" })))
}

async fn cors_headers(
    State(cors): State<Arc<CorsPolicy>>,
    request: Request,
    next: Next,
) -> Response {
    let mut response = next.run(request).await;
    let headers = response.headers_mut();
    headers.insert(ACCESS_CONTROL_ALLOW_ORIGIN, cors.origin.clone());
    headers.insert(
        ACCESS_CONTROL_ALLOW_CREDENTIALS,
        HeaderValue::from_static("true"),
    );
    headers.insert(
        ACCESS_CONTROL_EXPOSE_HEADERS,
        HeaderValue::from_static(EXPOSED_HEADERS),
    );
    response
}
