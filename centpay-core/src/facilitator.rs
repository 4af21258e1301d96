//! The settlement authority seam.
//!
//! A [`Facilitator`] checks that a presented credential pays an invoice and
//! then moves the funds. The paywall is generic over it; [`MockFacilitator`]
//! approves everything and is used for demos and tests.

use std::convert::Infallible;

use bon::Builder;
use serde::{Deserialize, Serialize};

use crate::{
    header::{PaymentCredential, PaymentScheme},
    invoice::Invoice,
    transport::PaymentRequirements,
};

/// A credential matched to the invoice it claims to pay.
#[derive(Debug, Clone)]
pub struct PaymentRequest {
    pub credential: PaymentCredential,
    pub invoice: Invoice,
    pub requirements: PaymentRequirements,
}

impl PaymentRequest {
    pub fn new(credential: PaymentCredential, invoice: Invoice) -> Self {
        let requirements = PaymentRequirements::from_invoice(&invoice);
        PaymentRequest {
            credential,
            invoice,
            requirements,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerifyResult {
    Valid(VerifyValid),
    Invalid(VerifyInvalid),
}

impl VerifyResult {
    pub fn is_valid(&self) -> bool {
        matches!(self, VerifyResult::Valid(_))
    }

    pub fn valid(payer: impl Into<String>) -> Self {
        VerifyResult::Valid(VerifyValid {
            payer: payer.into(),
        })
    }

    pub fn invalid(invalid_reason: impl Into<String>, payer: Option<String>) -> Self {
        VerifyResult::Invalid(VerifyInvalid {
            invalid_reason: invalid_reason.into(),
            payer,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerifyValid {
    pub payer: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerifyInvalid {
    pub invalid_reason: String,
    pub payer: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SettleResult {
    Success(SettleSuccess),
    Failed(SettleFailed),
}

impl SettleResult {
    pub fn is_success(&self) -> bool {
        matches!(self, SettleResult::Success(_))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettleSuccess {
    pub payer: String,
    pub transaction: String,
    pub network: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettleFailed {
    pub error_reason: String,
    pub payer: Option<String>,
}

/// Settlement authority interface.
pub trait Facilitator {
    type Error: std::error::Error + Send + Sync + 'static;

    /// The header scheme this facilitator accepts credentials in.
    fn scheme(&self) -> PaymentScheme;

    fn verify(
        &self,
        request: &PaymentRequest,
    ) -> impl Future<Output = Result<VerifyResult, Self::Error>> + Send;

    fn settle(
        &self,
        request: &PaymentRequest,
    ) -> impl Future<Output = Result<SettleResult, Self::Error>> + Send;
}

/// In-process facilitator that approves every payment and settles instantly.
#[derive(Builder, Debug, Clone)]
pub struct MockFacilitator {
    #[builder(into, default = String::from("demo-buyer"))]
    pub payer: String,
}

impl Default for MockFacilitator {
    fn default() -> Self {
        MockFacilitator::builder().build()
    }
}

impl Facilitator for MockFacilitator {
    type Error = Infallible;

    fn scheme(&self) -> PaymentScheme {
        PaymentScheme::Demo
    }

    async fn verify(&self, request: &PaymentRequest) -> Result<VerifyResult, Infallible> {
        #[cfg(feature = "tracing")]
        tracing::debug!(nonce = %request.invoice.nonce, "Mock facilitator approving payment");
        #[cfg(not(feature = "tracing"))]
        let _ = request;

        Ok(VerifyResult::valid(self.payer.clone()))
    }

    async fn settle(&self, request: &PaymentRequest) -> Result<SettleResult, Infallible> {
        Ok(SettleResult::Success(SettleSuccess {
            payer: self.payer.clone(),
            transaction: format!("mock-tx-{}", uuid::Uuid::new_v4()),
            network: request.invoice.network.clone(),
        }))
    }
}
