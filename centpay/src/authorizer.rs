//! Spend authorization on the buyer side.
//!
//! An [`Authorizer`] decides whether the agent may pay an invoice and hands back the
//! credential to present. Three implementations are provided:
//!
//! - [`MockAuthorizer`]: approves everything with a `demo` credential.
//! - [`PolicyAuthorizer`]: delegates the decision to a remote policy engine.
//! - [`LocalSignerAuthorizer`]: enforces a per-spend limit and signs an `x402` proof locally.

use std::{sync::Arc, time::Duration};

use bon::Builder;
use centpay_core::{
    header::{PaymentCredential, with_scheme_prefix},
    invoice::{AssetInfo, InvoiceNonce},
    transport::AuditRecord,
    types::{AmountValue, X402V1},
};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::json;
use url::Url;

/// Default HTTP timeout for policy engine requests.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(15);

/// What the agent is asking permission to pay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpendRequest {
    /// Seller identifier.
    pub vendor: String,
    /// Decimal price, e.g. `"0.01"`.
    pub amount: String,
    pub currency: String,
    /// Price in minor units, when the challenge states it.
    pub price_cents: Option<u64>,
    /// Free-form purpose of the spend, usually the user's prompt.
    pub memo: String,
    pub invoice_nonce: InvoiceNonce,
    pub pay_to: Option<String>,
    pub network: Option<String>,
    pub scheme: Option<String>,
    pub asset: Option<AssetInfo>,
    pub expires_at: Option<DateTime<Utc>>,
}

/// The credential an authorizer hands back.
#[derive(Debug, Clone, PartialEq)]
pub enum AuthorizedCredential {
    /// A credential the agent encodes itself.
    Structured(PaymentCredential),
    /// A ready-made header value, possibly missing its scheme token.
    HeaderToken(String),
}

impl AuthorizedCredential {
    /// The `X-PAYMENT` header value to send.
    pub fn to_header(&self) -> centpay_core::errors::Result<String> {
        match self {
            AuthorizedCredential::Structured(credential) => credential.encode(),
            AuthorizedCredential::HeaderToken(token) => Ok(with_scheme_prefix(token)),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Authorization {
    pub approved: bool,
    pub credential: Option<AuthorizedCredential>,
    /// Reference to fetch the audit record later.
    pub audit_id: Option<String>,
    pub reason: Option<String>,
}

impl Authorization {
    pub fn approve(credential: AuthorizedCredential, audit_id: Option<String>) -> Self {
        Authorization {
            approved: true,
            credential: Some(credential),
            audit_id,
            reason: None,
        }
    }

    pub fn deny(reason: impl Into<String>) -> Self {
        Authorization {
            approved: false,
            credential: None,
            audit_id: None,
            reason: Some(reason.into()),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum AuthorizerError {
    #[error("URL parse error: {0}")]
    UrlParseError(#[from] url::ParseError),
    #[error("Policy engine request timed out")]
    Timeout,
    #[error("HTTP request error: {0}")]
    HttpRequestError(reqwest::Error),
    #[error("Policy engine returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error("Unknown audit id: {0}")]
    UnknownAudit(String),
    #[error("Signer error: {0}")]
    Signer(String),
    #[error("Serialization error: {0}")]
    SerdeError(#[from] serde_json::Error),
    #[error(transparent)]
    Core(#[from] centpay_core::errors::Error),
}

impl From<reqwest::Error> for AuthorizerError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            AuthorizerError::Timeout
        } else {
            AuthorizerError::HttpRequestError(err)
        }
    }
}

/// Buyer-side spend authorization interface.
pub trait Authorizer {
    fn authorize(
        &self,
        request: &SpendRequest,
    ) -> impl Future<Output = Result<Authorization, AuthorizerError>> + Send;

    fn fetch_audit(
        &self,
        audit_id: &str,
    ) -> impl Future<Output = Result<AuditRecord, AuthorizerError>> + Send;
}

/// Approves every spend with a `demo <nonce>` header and remembers it until its audit is fetched.
#[derive(Builder, Debug, Clone)]
pub struct MockAuthorizer {
    #[builder(into, default = String::from("daily-$1"))]
    pub policy_label: String,
    #[builder(skip)]
    approvals: Arc<DashMap<String, SpendRequest>>,
}

impl Default for MockAuthorizer {
    fn default() -> Self {
        MockAuthorizer::builder().build()
    }
}

impl Authorizer for MockAuthorizer {
    async fn authorize(&self, request: &SpendRequest) -> Result<Authorization, AuthorizerError> {
        let audit_id = format!("mock-audit-{}", uuid::Uuid::new_v4());
        self.approvals.insert(audit_id.clone(), request.clone());

        tracing::debug!(audit_id = %audit_id, vendor = %request.vendor, "Mock spend approved");

        Ok(Authorization::approve(
            AuthorizedCredential::HeaderToken(format!("demo {}", request.invoice_nonce)),
            Some(audit_id),
        ))
    }

    async fn fetch_audit(&self, audit_id: &str) -> Result<AuditRecord, AuthorizerError> {
        let request = self
            .approvals
            .remove(audit_id)
            .map(|(_, request)| request)
            .ok_or_else(|| AuthorizerError::UnknownAudit(audit_id.to_string()))?;
        let suffix = audit_id.rsplit('-').next().unwrap_or(audit_id);

        Ok(AuditRecord::builder()
            .spent(request.amount)
            .currency(request.currency)
            .tx(format!("mock-tx-{suffix}"))
            .policy(self.policy_label.clone())
            .vendor(request.vendor)
            .build())
    }
}

/// Body POSTed to the policy engine's `spend/authorize` endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicySpendRequest {
    pub vendor: String,
    pub amount: String,
    pub currency: String,
    pub memo: String,
    pub invoice_nonce: InvoiceNonce,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyDecision {
    pub approved: bool,
    #[serde(default, alias = "paymentHeader")]
    pub payment_header: Option<String>,
    #[serde(default, alias = "auditId")]
    pub audit_id: Option<String>,
    #[serde(default)]
    pub reason: Option<String>,
}

impl From<PolicyDecision> for Authorization {
    fn from(decision: PolicyDecision) -> Self {
        Authorization {
            approved: decision.approved,
            credential: decision.payment_header.map(AuthorizedCredential::HeaderToken),
            audit_id: decision.audit_id,
            reason: decision.reason,
        }
    }
}

/// Delegates spend decisions to a remote policy engine.
#[derive(Debug, Clone)]
pub struct PolicyAuthorizer {
    base_url: Url,
    api_key: Option<String>,
    client: reqwest::Client,
}

impl PolicyAuthorizer {
    pub fn new(base_url: Url, api_key: Option<String>) -> Result<Self, AuthorizerError> {
        Self::with_timeout(base_url, api_key, DEFAULT_TIMEOUT)
    }

    pub fn with_timeout(
        mut base_url: Url,
        api_key: Option<String>,
        timeout: Duration,
    ) -> Result<Self, AuthorizerError> {
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(PolicyAuthorizer {
            base_url,
            api_key,
            client,
        })
    }

    fn with_auth(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_key {
            Some(key) => request.bearer_auth(key),
            None => request,
        }
    }

    async fn read<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, AuthorizerError> {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AuthorizerError::Status {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response.json().await?)
    }
}

impl Authorizer for PolicyAuthorizer {
    async fn authorize(&self, request: &SpendRequest) -> Result<Authorization, AuthorizerError> {
        let url = self.base_url.join("spend/authorize")?;
        let body = PolicySpendRequest {
            vendor: request.vendor.clone(),
            amount: request.amount.clone(),
            currency: request.currency.clone(),
            memo: request.memo.clone(),
            invoice_nonce: request.invoice_nonce.clone(),
        };

        let response = self.with_auth(self.client.post(url).json(&body)).send().await?;
        let decision: PolicyDecision = Self::read(response).await?;

        tracing::debug!(approved = decision.approved, audit_id = ?decision.audit_id, "Policy decision");
        Ok(decision.into())
    }

    async fn fetch_audit(&self, audit_id: &str) -> Result<AuditRecord, AuthorizerError> {
        let mut url = self.base_url.join("audit/")?;
        url.path_segments_mut()
            .map_err(|_| AuthorizerError::UnknownAudit(audit_id.to_string()))?
            .pop_if_empty()
            .push(audit_id);

        let response = self.with_auth(self.client.get(url)).send().await?;
        Self::read(response).await
    }
}

/// Opaque signing capability. The scheme behind it is not this crate's concern.
pub trait PayloadSigner {
    /// Identifier of the paying account, used as `authorization.from`.
    fn address(&self) -> String;

    fn sign(&self, message: &[u8]) -> Result<Vec<u8>, String>;
}

/// Signs `x402` proofs locally, up to a per-spend limit.
#[derive(Builder, Debug, Clone)]
pub struct LocalSignerAuthorizer<S: PayloadSigner> {
    pub signer: S,
    /// Largest single spend, in minor units.
    pub max_spend_cents: u64,
}

impl<S: PayloadSigner> LocalSignerAuthorizer<S> {
    /// Build the signed `x402` proof object for a spend.
    pub fn sign_proof(
        &self,
        request: &SpendRequest,
        price_cents: u64,
    ) -> Result<serde_json::Value, AuthorizerError> {
        let asset = request.asset.as_ref();
        let value = AmountValue::from_minor_units(
            price_cents,
            asset.map(|a| a.decimals).unwrap_or(centpay_core::types::MINOR_UNIT_DECIMALS),
        )?;
        let now = Utc::now().timestamp();
        let valid_before = request
            .expires_at
            .map(|at| at.timestamp())
            .unwrap_or(now + 120);

        let authorization = json!({
            "from": self.signer.address(),
            "to": request.pay_to.as_deref().unwrap_or(&request.vendor),
            "value": value,
            "validAfter": (now - 60).to_string(),
            "validBefore": valid_before.to_string(),
            "nonce": request.invoice_nonce,
        });
        let message = serde_json::to_vec(&authorization)?;
        let signature = self.signer.sign(&message).map_err(AuthorizerError::Signer)?;

        Ok(json!({
            "x402Version": X402V1,
            "scheme": request.scheme.as_deref().unwrap_or("exact"),
            "network": request.network.as_deref().unwrap_or_default(),
            "payload": {
                "signature": format!("0x{}", hex::encode(signature)),
                "authorization": authorization,
            }
        }))
    }
}

impl<S: PayloadSigner + Send + Sync> Authorizer for LocalSignerAuthorizer<S> {
    async fn authorize(&self, request: &SpendRequest) -> Result<Authorization, AuthorizerError> {
        let Some(price_cents) = request.price_cents else {
            return Ok(Authorization::deny("price in minor units is unknown"));
        };
        if price_cents > self.max_spend_cents {
            return Ok(Authorization::deny(format!(
                "spend of {price_cents} exceeds limit of {} minor units",
                self.max_spend_cents
            )));
        }

        let proof = self.sign_proof(request, price_cents)?;
        let credential = PaymentCredential::x402(proof)
            .map_err(|err| AuthorizerError::Signer(err.to_string()))?;

        Ok(Authorization::approve(
            AuthorizedCredential::Structured(credential),
            None,
        ))
    }

    async fn fetch_audit(&self, audit_id: &str) -> Result<AuditRecord, AuthorizerError> {
        Err(AuthorizerError::UnknownAudit(audit_id.to_string()))
    }
}

/// The authorizer selected at startup from explicit configuration.
#[derive(Debug, Clone)]
pub enum ConfiguredAuthorizer {
    Mock(MockAuthorizer),
    Policy(PolicyAuthorizer),
}

impl Authorizer for ConfiguredAuthorizer {
    async fn authorize(&self, request: &SpendRequest) -> Result<Authorization, AuthorizerError> {
        match self {
            ConfiguredAuthorizer::Mock(mock) => mock.authorize(request).await,
            ConfiguredAuthorizer::Policy(policy) => policy.authorize(request).await,
        }
    }

    async fn fetch_audit(&self, audit_id: &str) -> Result<AuditRecord, AuthorizerError> {
        match self {
            ConfiguredAuthorizer::Mock(mock) => mock.fetch_audit(audit_id).await,
            ConfiguredAuthorizer::Policy(policy) => policy.fetch_audit(audit_id).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use centpay_core::header::{PaymentScheme, decode};

    use super::*;

    fn spend(price_cents: Option<u64>) -> SpendRequest {
        SpendRequest {
            vendor: "demo.seller".to_string(),
            amount: "0.01".to_string(),
            currency: "USDC".to_string(),
            price_cents,
            memo: "tell me a joke".to_string(),
            invoice_nonce: InvoiceNonce::from("nonce-1"),
            pay_to: Some("0xseller".to_string()),
            network: Some("base-sepolia".to_string()),
            scheme: Some("exact".to_string()),
            asset: Some(AssetInfo {
                address: "0xasset".to_string(),
                decimals: 6,
                symbol: "USDC".to_string(),
            }),
            expires_at: None,
        }
    }

    struct XorSigner;

    impl PayloadSigner for XorSigner {
        fn address(&self) -> String {
            "0xbuyer".to_string()
        }

        fn sign(&self, message: &[u8]) -> Result<Vec<u8>, String> {
            Ok(vec![message.iter().fold(0u8, |acc, b| acc ^ b)])
        }
    }

    #[tokio::test]
    async fn mock_approves_and_audits() {
        let authorizer = MockAuthorizer::default();
        let authorization = authorizer.authorize(&spend(Some(1))).await.unwrap();

        assert!(authorization.approved);
        let header = authorization.credential.unwrap().to_header().unwrap();
        assert_eq!(header, "demo nonce-1");

        let audit_id = authorization.audit_id.unwrap();
        assert!(audit_id.starts_with("mock-audit-"));
        let audit = authorizer.fetch_audit(&audit_id).await.unwrap();
        assert_eq!(audit.spent, "0.01");
        assert_eq!(audit.vendor.as_deref(), Some("demo.seller"));
        assert_eq!(audit.policy.as_deref(), Some("daily-$1"));
        let suffix = audit_id.rsplit('-').next().unwrap();
        assert_eq!(audit.tx, Some(format!("mock-tx-{suffix}")));

        assert!(matches!(
            authorizer.fetch_audit("mock-audit-unknown").await,
            Err(AuthorizerError::UnknownAudit(_))
        ));
    }

    #[tokio::test]
    async fn mock_forgets_approval_once_audited() {
        let authorizer = MockAuthorizer::default();
        let audit_id = authorizer
            .authorize(&spend(Some(1)))
            .await
            .unwrap()
            .audit_id
            .unwrap();

        assert!(authorizer.fetch_audit(&audit_id).await.is_ok());
        assert!(authorizer.approvals.is_empty());
        assert!(matches!(
            authorizer.fetch_audit(&audit_id).await,
            Err(AuthorizerError::UnknownAudit(_))
        ));
    }

    #[test]
    fn header_tokens_are_prefixed() {
        let token = AuthorizedCredential::HeaderToken("eyJub25jZSI6Im4ifQ".to_string());
        assert_eq!(token.to_header().unwrap(), "x402 eyJub25jZSI6Im4ifQ");
    }

    #[tokio::test]
    async fn local_signer_builds_x402_proof() {
        let authorizer = LocalSignerAuthorizer::builder()
            .signer(XorSigner)
            .max_spend_cents(5)
            .build();
        let authorization = authorizer.authorize(&spend(Some(1))).await.unwrap();
        assert!(authorization.approved);
        assert_eq!(authorization.audit_id, None);

        let header = authorization.credential.unwrap().to_header().unwrap();
        let decoded = decode(&header).unwrap();
        assert_eq!(decoded.scheme, PaymentScheme::X402);
        assert_eq!(decoded.nonce.as_str(), "nonce-1");

        let proof = decoded.proof.unwrap();
        assert_eq!(proof["payload"]["authorization"]["value"], "10000");
        assert_eq!(proof["payload"]["authorization"]["to"], "0xseller");
        assert_eq!(proof["payload"]["authorization"]["from"], "0xbuyer");
        assert!(proof["payload"]["signature"].as_str().unwrap().starts_with("0x"));
    }

    #[tokio::test]
    async fn local_signer_enforces_limit() {
        let authorizer = LocalSignerAuthorizer::builder()
            .signer(XorSigner)
            .max_spend_cents(5)
            .build();

        let denied = authorizer.authorize(&spend(Some(6))).await.unwrap();
        assert!(!denied.approved);
        assert!(denied.credential.is_none());
        assert!(denied.reason.unwrap().contains("exceeds limit"));

        let unknown = authorizer.authorize(&spend(None)).await.unwrap();
        assert!(!unknown.approved);
    }
}
