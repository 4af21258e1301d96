//! The paying client.
//!
//! [`PaymentAgent`] requests a resource, and when answered with `402 Payment Required`
//! asks its [`Authorizer`] for permission, presents the credential, and retries once.

use std::time::Duration;

use bon::Builder;
use centpay_core::{
    header::{HEADER_PAYMENT, HEADER_REQUEST_ID},
    invoice::{AssetInfo, InvoiceNonce, Price},
    transport::AuditRecord,
    types::AnyJson,
};
use chrono::{DateTime, Utc};
use http::StatusCode;
use serde::Deserialize;
use url::Url;

use crate::authorizer::{Authorizer, AuthorizerError, SpendRequest};

/// Default bound on each HTTP round trip.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    #[error("Unexpected status {status}: {body}")]
    UnexpectedStatus { status: u16, body: AnyJson },
    #[error("Invalid payment challenge: {0}")]
    InvalidChallenge(String),
    #[error("Authorization denied: {}", reason.as_deref().unwrap_or("no reason given"))]
    AuthorizationDenied { reason: Option<String> },
    #[error("Payment rejected with status {status}: {body}")]
    PaymentRejected { status: u16, body: AnyJson },
    #[error("Request timed out")]
    Timeout,
    #[error("HTTP request error: {0}")]
    Http(reqwest::Error),
    #[error("Authorizer error: {0}")]
    Authorizer(#[from] AuthorizerError),
    #[error("Failed to encode payment header: {0}")]
    Encode(#[from] centpay_core::errors::Error),
    #[error("Cancelled")]
    Cancelled,
}

impl From<reqwest::Error> for AgentError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            AgentError::Timeout
        } else {
            AgentError::Http(err)
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SellerRef {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct FacilitatorRef {
    #[serde(default)]
    pub pay_to: Option<String>,
    #[serde(default)]
    pub network: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PaymentRef {
    #[serde(default)]
    pub scheme: Option<String>,
    #[serde(default)]
    pub asset: Option<AssetInfo>,
}

/// The parts of a `402` challenge body the agent relies on.
///
/// Only `invoice_nonce`, `price` and a vendor (`seller.id` or `facilitator.pay_to`)
/// are required; everything else is best effort.
#[derive(Debug, Clone, Deserialize)]
pub struct ChallengeTerms {
    pub invoice_nonce: InvoiceNonce,
    pub price: Price,
    #[serde(default)]
    pub price_cents: Option<u64>,
    #[serde(default)]
    pub seller: SellerRef,
    #[serde(default)]
    pub facilitator: FacilitatorRef,
    #[serde(default)]
    pub payment: PaymentRef,
    #[serde(default)]
    pub expires_at: Option<String>,
}

impl ChallengeTerms {
    pub fn parse(body: &AnyJson) -> Result<Self, AgentError> {
        let terms = ChallengeTerms::deserialize(body)
            .map_err(|err| AgentError::InvalidChallenge(err.to_string()))?;
        if terms.invoice_nonce.as_str().trim().is_empty() {
            return Err(AgentError::InvalidChallenge(
                "invoice_nonce is empty".to_string(),
            ));
        }
        if terms.vendor().is_none() {
            return Err(AgentError::InvalidChallenge(
                "challenge names no vendor".to_string(),
            ));
        }
        Ok(terms)
    }

    pub fn vendor(&self) -> Option<&str> {
        self.seller
            .id
            .as_deref()
            .filter(|v| !v.is_empty())
            .or_else(|| self.facilitator.pay_to.as_deref().filter(|v| !v.is_empty()))
    }

    pub fn spend_request(&self, memo: &str) -> SpendRequest {
        SpendRequest {
            vendor: self.vendor().unwrap_or_default().to_string(),
            amount: self.price.amount.clone(),
            currency: self.price.currency.clone(),
            price_cents: self
                .price_cents
                .or_else(|| parse_minor_units(&self.price.amount)),
            memo: memo.to_string(),
            invoice_nonce: self.invoice_nonce.clone(),
            pay_to: self.facilitator.pay_to.clone(),
            network: self.facilitator.network.clone(),
            scheme: self.payment.scheme.clone(),
            asset: self.payment.asset.clone(),
            expires_at: self
                .expires_at
                .as_deref()
                .and_then(|ts| DateTime::parse_from_rfc3339(ts).ok())
                .map(|ts| ts.with_timezone(&Utc)),
        }
    }
}

/// Parse a two-place decimal string such as `"0.01"` into minor units.
pub fn parse_minor_units(amount: &str) -> Option<u64> {
    let (whole, frac) = amount.trim().split_once('.').unwrap_or((amount.trim(), ""));
    if frac.len() > 2 || !frac.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    let whole: u64 = whole.parse().ok()?;
    let frac: u64 = if frac.is_empty() {
        0
    } else {
        format!("{frac:0<2}").parse().ok()?
    };
    whole.checked_mul(100)?.checked_add(frac)
}

/// Where the reported audit record came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuditSource {
    Authorizer,
    Response,
    None,
}

/// Outcome of a successful run.
#[derive(Debug, Clone)]
pub struct AgentReport {
    pub joke: Option<String>,
    pub body: AnyJson,
    pub audit: Option<AuditRecord>,
    pub audit_source: AuditSource,
    /// Whether a payment was made.
    pub paid: bool,
    pub request_id: Option<String>,
}

struct HttpOutcome {
    status: StatusCode,
    body: AnyJson,
    request_id: Option<String>,
}

/// Client that pays for a gated resource on demand.
#[derive(Builder, Debug, Clone)]
pub struct PaymentAgent<A: Authorizer> {
    pub authorizer: A,
    pub resource_url: Url,
    #[builder(default)]
    pub client: reqwest::Client,
    #[builder(default = DEFAULT_TIMEOUT)]
    pub timeout: Duration,
}

impl<A: Authorizer> PaymentAgent<A> {
    /// Fetch the resource, paying for it if required.
    pub async fn run(&self, memo: &str) -> Result<AgentReport, AgentError> {
        tracing::info!(url = %self.resource_url, memo, "Requesting resource");

        let first = self.fetch(None).await?;
        match first.status {
            StatusCode::OK => {
                tracing::info!("Resource served without payment");
                return Ok(report(first, None, false));
            }
            StatusCode::PAYMENT_REQUIRED => {}
            status => {
                return Err(AgentError::UnexpectedStatus {
                    status: status.as_u16(),
                    body: first.body,
                });
            }
        }

        let terms = ChallengeTerms::parse(&first.body)?;
        let spend = terms.spend_request(memo);
        tracing::info!(
            vendor = %spend.vendor,
            amount = %spend.amount,
            currency = %spend.currency,
            nonce = %spend.invoice_nonce,
            "Payment required, requesting authorization"
        );

        let authorization = self.authorizer.authorize(&spend).await?;
        if !authorization.approved {
            return Err(AgentError::AuthorizationDenied {
                reason: authorization.reason,
            });
        }
        let Some(credential) = authorization.credential else {
            return Err(AgentError::AuthorizationDenied {
                reason: authorization
                    .reason
                    .or_else(|| Some("no payment credential issued".to_string())),
            });
        };
        let header = credential.to_header()?;

        let paid = self.fetch(Some(&header)).await?;
        if paid.status != StatusCode::OK {
            return Err(AgentError::PaymentRejected {
                status: paid.status.as_u16(),
                body: paid.body,
            });
        }

        let audit = match authorization.audit_id {
            Some(audit_id) => match self.authorizer.fetch_audit(&audit_id).await {
                Ok(audit) => Some((audit, AuditSource::Authorizer)),
                Err(err) => {
                    tracing::warn!(audit_id = %audit_id, "Failed to fetch audit record: {err}");
                    None
                }
            },
            None => None,
        };

        Ok(report(paid, audit, true))
    }

    /// [`run`](Self::run), abandoned as soon as `cancel` resolves.
    pub async fn run_until(
        &self,
        memo: &str,
        cancel: impl Future<Output = ()>,
    ) -> Result<AgentReport, AgentError> {
        tokio::select! {
            result = self.run(memo) => result,
            _ = cancel => Err(AgentError::Cancelled),
        }
    }

    async fn fetch(&self, payment: Option<&str>) -> Result<HttpOutcome, AgentError> {
        let mut request = self
            .client
            .get(self.resource_url.clone())
            .timeout(self.timeout);
        if let Some(payment) = payment {
            request = request.header(HEADER_PAYMENT, payment);
        }

        let response = request.send().await?;
        let status = response.status();
        let request_id = response
            .headers()
            .get(HEADER_REQUEST_ID)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let text = response.text().await?;

        tracing::debug!(status = %status, request_id = ?request_id, "Resource responded");

        Ok(HttpOutcome {
            status,
            body: safe_json(&text),
            request_id,
        })
    }
}

fn report(outcome: HttpOutcome, audit: Option<(AuditRecord, AuditSource)>, paid: bool) -> AgentReport {
    let embedded = outcome
        .body
        .get("audit")
        .and_then(|audit| AuditRecord::deserialize(audit).ok());
    let (audit, audit_source) = match (audit, embedded) {
        (Some((audit, source)), _) => (Some(audit), source),
        (None, Some(audit)) => (Some(audit), AuditSource::Response),
        (None, None) => (None, AuditSource::None),
    };

    AgentReport {
        joke: outcome
            .body
            .get("joke")
            .and_then(AnyJson::as_str)
            .map(str::to_string),
        body: outcome.body,
        audit,
        audit_source,
        paid,
        request_id: outcome.request_id,
    }
}

/// Parse a response body as JSON, falling back to the raw text.
pub fn safe_json(text: &str) -> AnyJson {
    if text.trim().is_empty() {
        return AnyJson::Null;
    }
    serde_json::from_str(text).unwrap_or_else(|_| AnyJson::String(text.to_string()))
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn minor_unit_parsing() {
        assert_eq!(parse_minor_units("0.01"), Some(1));
        assert_eq!(parse_minor_units("1.5"), Some(150));
        assert_eq!(parse_minor_units("12"), Some(1200));
        assert_eq!(parse_minor_units("0.001"), None);
        assert_eq!(parse_minor_units("abc"), None);
        assert_eq!(parse_minor_units("1.-5"), None);
    }

    #[test]
    fn empty_seller_id_falls_back_to_pay_to() {
        let challenge = json!({
            "invoice_nonce": "n-1",
            "price": { "amount": "0.01", "currency": "USDC" },
            "seller": { "id": "" },
            "facilitator": { "pay_to": "0xseller" }
        });
        let terms = ChallengeTerms::parse(&challenge).unwrap();
        assert_eq!(terms.vendor(), Some("0xseller"));
        assert_eq!(terms.spend_request("joke").vendor, "0xseller");
    }

    #[test]
    fn challenge_needs_vendor_and_nonce() {
        let minimal = json!({
            "invoice_nonce": "n-1",
            "price": { "amount": "0.01", "currency": "USDC" },
            "facilitator": { "pay_to": "0xseller" }
        });
        let terms = ChallengeTerms::parse(&minimal).unwrap();
        assert_eq!(terms.vendor(), Some("0xseller"));

        let spend = terms.spend_request("joke please");
        assert_eq!(spend.price_cents, Some(1));
        assert_eq!(spend.vendor, "0xseller");

        let no_vendor = json!({
            "invoice_nonce": "n-1",
            "price": { "amount": "0.01", "currency": "USDC" }
        });
        assert!(matches!(
            ChallengeTerms::parse(&no_vendor),
            Err(AgentError::InvalidChallenge(_))
        ));

        let no_nonce = json!({
            "price": { "amount": "0.01", "currency": "USDC" },
            "seller": { "id": "demo.seller" }
        });
        assert!(matches!(
            ChallengeTerms::parse(&no_nonce),
            Err(AgentError::InvalidChallenge(_))
        ));
    }

    #[test]
    fn seller_id_is_preferred_vendor() {
        let body = json!({
            "invoice_nonce": "n-1",
            "price": { "amount": "0.01", "currency": "USDC" },
            "seller": { "id": "demo.seller", "name": "Jokes" },
            "facilitator": { "pay_to": "0xseller" },
            "expires_at": "2030-01-01T00:00:00.000Z"
        });
        let spend = ChallengeTerms::parse(&body).unwrap().spend_request("m");
        assert_eq!(spend.vendor, "demo.seller");
        assert_eq!(spend.expires_at.unwrap().timestamp(), 1_893_456_000);
    }

    #[test]
    fn safe_json_falls_back_to_text() {
        assert_eq!(safe_json(r#"{"a":1}"#), json!({ "a": 1 }));
        assert_eq!(safe_json("Bad Gateway"), json!("Bad Gateway"));
        assert_eq!(safe_json("  "), AnyJson::Null);
    }
}
