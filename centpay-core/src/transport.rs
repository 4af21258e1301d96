//! Wire bodies exchanged between buyer, seller and facilitator.

use bon::Builder;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::{
    errors::RejectReason,
    header::PaymentCredential,
    invoice::{AssetInfo, Invoice, InvoiceNonce, Price, format_timestamp},
    types::{AmountValue, AnyJson, PROTOCOL_VERSION, RequestId, X402V1},
};

/// Value of `error` in a `402` challenge body.
pub const ERROR_PAYMENT_REQUIRED: &str = "payment_required";

/// Value of `error` in a `402` rejection body.
pub const ERROR_PAYMENT_INVALID: &str = "payment_invalid";

/// Value of `error` in a `502` settlement failure body.
pub const ERROR_SETTLEMENT_FAILED: &str = "settlement_failed";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FacilitatorInfo {
    pub url: Url,
    pub pay_to: String,
    pub network: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentInfo {
    pub scheme: String,
    pub asset: AssetInfo,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SellerInfo {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyInfo {
    pub label: String,
}

/// Body of a `402 Payment Required` response with no credential presented.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentChallenge {
    pub error: String,
    pub request_id: RequestId,
    pub invoice_nonce: InvoiceNonce,
    pub price: Price,
    pub price_cents: u64,
    pub facilitator: FacilitatorInfo,
    pub payment: PaymentInfo,
    pub seller: SellerInfo,
    pub policy: PolicyInfo,
    pub resource: Url,
    pub mime_type: String,
    pub ttl_ms: u64,
    pub protocol_version: String,
    pub expires_at: String,
    pub created_at: String,
}

impl From<&Invoice> for PaymentChallenge {
    fn from(invoice: &Invoice) -> Self {
        PaymentChallenge {
            error: ERROR_PAYMENT_REQUIRED.to_string(),
            request_id: invoice.request_id.clone(),
            invoice_nonce: invoice.nonce.clone(),
            price: invoice.price.clone(),
            price_cents: invoice.price_cents,
            facilitator: FacilitatorInfo {
                url: invoice.facilitator_url.clone(),
                pay_to: invoice.pay_to.clone(),
                network: invoice.network.clone(),
            },
            payment: PaymentInfo {
                scheme: invoice.scheme.clone(),
                asset: invoice.asset.clone(),
            },
            seller: SellerInfo {
                id: invoice.pay_to.clone(),
                name: invoice.seller_name.clone(),
            },
            policy: PolicyInfo {
                label: invoice.policy_label.clone(),
            },
            resource: invoice.resource.clone(),
            mime_type: invoice.mime_type.clone(),
            ttl_ms: invoice.ttl_ms(),
            protocol_version: PROTOCOL_VERSION.to_string(),
            expires_at: format_timestamp(invoice.expires_at),
            created_at: format_timestamp(invoice.created_at),
        }
    }
}

/// Body of a `402` response rejecting a presented credential.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentRejected {
    pub error: String,
    pub reason: RejectReason,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Extra facilitator-provided context, flattened into the body.
    #[serde(flatten)]
    pub detail: serde_json::Map<String, AnyJson>,
}

impl PaymentRejected {
    pub fn new(reason: RejectReason) -> Self {
        PaymentRejected {
            error: ERROR_PAYMENT_INVALID.to_string(),
            reason,
            message: None,
            detail: serde_json::Map::new(),
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn with_detail(mut self, key: impl Into<String>, value: impl Into<AnyJson>) -> Self {
        self.detail.insert(key.into(), value.into());
        self
    }
}

/// Body of a `502` response when settlement failed after a consumed invoice.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettlementFailed {
    pub error: String,
    pub reason: String,
    pub message: String,
}

impl SettlementFailed {
    pub fn new(reason: impl Into<String>) -> Self {
        SettlementFailed {
            error: ERROR_SETTLEMENT_FAILED.to_string(),
            reason: reason.into(),
            message: "Payment was not settled. Request a new payment challenge and pay again."
                .to_string(),
        }
    }
}

/// Receipt describing a completed purchase.
#[derive(Builder, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditRecord {
    #[builder(into)]
    pub spent: String,
    #[builder(into)]
    pub currency: String,
    #[serde(default, alias = "transaction")]
    #[builder(into)]
    pub tx: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[builder(into)]
    pub policy: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[builder(into)]
    pub vendor: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[builder(into)]
    pub payer: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[builder(into)]
    pub network: Option<String>,
}

impl AuditRecord {
    /// `spent: 0.01 USDC | tx: mock-tx-... | vendor: demo.seller`
    pub fn summary(&self) -> String {
        format!(
            "spent: {} {} | tx: {} | vendor: {}",
            self.spent,
            self.currency,
            self.tx.as_deref().unwrap_or("n/a"),
            self.vendor.as_deref().unwrap_or("unknown"),
        )
    }
}

/// What a facilitator is asked to check a payment against.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentRequirements {
    pub scheme: String,
    pub network: String,
    pub max_amount_required: AmountValue,
    pub resource: Url,
    pub description: String,
    pub mime_type: String,
    pub pay_to: String,
    pub max_timeout_seconds: u64,
    pub asset: String,
    pub extra: RequirementsExtra,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequirementsExtra {
    pub invoice_nonce: InvoiceNonce,
}

impl PaymentRequirements {
    /// Derive the facilitator requirements for an invoice.
    pub fn from_invoice(invoice: &Invoice) -> Self {
        PaymentRequirements {
            scheme: invoice.scheme.clone(),
            network: invoice.network.clone(),
            max_amount_required: invoice.atomic_price,
            resource: invoice.resource.clone(),
            description: invoice.seller_name.clone(),
            mime_type: invoice.mime_type.clone(),
            pay_to: invoice.pay_to.clone(),
            max_timeout_seconds: invoice.timeout_seconds(),
            asset: invoice.asset.address.clone(),
            extra: RequirementsExtra {
                invoice_nonce: invoice.nonce.clone(),
            },
        }
    }
}

/// Body POSTed to a facilitator's `verify` and `settle` endpoints.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FacilitatorPaymentRequest {
    pub x402_version: X402V1,
    pub payment_payload: AnyJson,
    pub payment_requirements: PaymentRequirements,
}

impl FacilitatorPaymentRequest {
    pub fn new(credential: &PaymentCredential, requirements: &PaymentRequirements) -> Self {
        FacilitatorPaymentRequest {
            x402_version: X402V1,
            payment_payload: credential.payload(),
            payment_requirements: requirements.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use serde_json::json;

    use super::*;
    use crate::invoice::tests::terms;

    #[test]
    fn challenge_body_shape() {
        let invoice = terms().issue(&RequestId("req-7".into()), Utc::now()).unwrap();
        let body = serde_json::to_value(PaymentChallenge::from(&invoice)).unwrap();

        assert_eq!(body["error"], "payment_required");
        assert_eq!(body["request_id"], "req-7");
        assert_eq!(body["invoice_nonce"], invoice.nonce.as_str());
        assert_eq!(body["price"], json!({ "amount": "0.01", "currency": "USDC" }));
        assert_eq!(body["price_cents"], 1);
        assert_eq!(body["facilitator"]["pay_to"], "demo.seller");
        assert_eq!(body["facilitator"]["network"], "base-sepolia");
        assert_eq!(body["payment"]["scheme"], "exact");
        assert_eq!(body["payment"]["asset"]["decimals"], 6);
        assert_eq!(body["seller"], json!({ "id": "demo.seller", "name": "1¢ Joke Agent" }));
        assert_eq!(body["policy"]["label"], "daily-$1");
        assert_eq!(body["resource"], "http://localhost:3000/joke");
        assert_eq!(body["ttl_ms"], 120_000);
        assert_eq!(body["protocol_version"], PROTOCOL_VERSION);
        assert!(body["expires_at"].as_str().unwrap().ends_with('Z'));
    }

    #[test]
    fn requirements_from_invoice() {
        let invoice = terms().issue(&RequestId::generate(), Utc::now()).unwrap();
        let requirements = PaymentRequirements::from_invoice(&invoice);
        let body = serde_json::to_value(&requirements).unwrap();

        assert_eq!(body["maxAmountRequired"], "10000");
        assert_eq!(body["maxTimeoutSeconds"], 120);
        assert_eq!(body["payTo"], "demo.seller");
        assert_eq!(body["mimeType"], "application/json");
        assert_eq!(body["description"], "1¢ Joke Agent");
        assert_eq!(body["asset"], "0x036CbD53842c5426634e7929541eC2318f3dCF7e");
        assert_eq!(body["extra"]["invoice_nonce"], invoice.nonce.as_str());
    }

    #[test]
    fn rejection_flattens_detail() {
        let body = PaymentRejected::new(RejectReason::FacilitatorRejected)
            .with_detail("facilitator_reason", "insufficient_funds");
        assert_eq!(
            serde_json::to_value(body).unwrap(),
            json!({
                "error": "payment_invalid",
                "reason": "facilitator_rejected",
                "facilitator_reason": "insufficient_funds",
            })
        );
    }

    #[test]
    fn audit_accepts_transaction_alias() {
        let audit: AuditRecord = serde_json::from_value(json!({
            "spent": "0.01",
            "currency": "USDC",
            "transaction": "0xabc",
        }))
        .unwrap();
        assert_eq!(audit.tx.as_deref(), Some("0xabc"));
        assert_eq!(audit.summary(), "spent: 0.01 USDC | tx: 0xabc | vendor: unknown");
    }
}
