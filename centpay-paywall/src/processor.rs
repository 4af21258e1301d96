use http::{Request, Response};
use centpay_core::{
    errors::RejectReason,
    facilitator::{
        Facilitator, PaymentRequest, SettleResult, SettleSuccess, VerifyResult, VerifyValid,
    },
    invoice::Invoice,
    transport::PaymentRejected,
    types::RequestId,
};

use crate::{errors::ErrorResponse, paywall::{PayWall, set_request_id}};

/// The state of a payment processed by the paywall when accessing the resource handler.
///
/// This state is attached to the request extensions before running the resource handler,
/// and can be accessed within the handler to compose a receipt.
///
/// # Example
///
/// ```rust
/// use axum::{extract::Extension, Json};
/// use serde_json::{json, Value};
/// use centpay_paywall::processor::PaymentState;
///
/// async fn example_handler(Extension(payment_state): Extension<PaymentState>) -> Json<Value> {
///     Json(json!({
///         "message": "You have accessed a protected resource!",
///         "spent": payment_state.invoice.price.amount,
///         "tx": payment_state.settled.map(|s| s.transaction),
///     }))
/// }
/// ```
#[derive(Debug, Clone)]
pub struct PaymentState {
    pub request_id: RequestId,
    /// The invoice this request consumed.
    pub invoice: Invoice,
    /// Verification result, if verification was performed.
    pub verified: Option<VerifyValid>,
    /// Settlement result, if settlement was performed.
    pub settled: Option<SettleSuccess>,
}

/// Payment processing state before running the resource handler.
///
/// See [`PayWall`] for usage in the full payment processing flow.
pub struct RequestProcessor<'pw, F: Facilitator, Req> {
    pub paywall: &'pw PayWall<F>,
    pub request: Request<Req>,
    pub payment: PaymentRequest,
    pub payment_state: PaymentState,
}

impl<'pw, F: Facilitator, Req> RequestProcessor<'pw, F, Req> {
    /// Verify the payment with the facilitator.
    ///
    /// `self.payment_state.verified` will be populated on success.
    pub async fn verify(mut self) -> Result<Self, ErrorResponse> {
        let request_id = &self.payment_state.request_id;
        let response = self
            .paywall
            .facilitator
            .verify(&self.payment)
            .await
            .map_err(|err| {
                #[cfg(feature = "tracing")]
                tracing::warn!(request_id = %request_id, "Facilitator verify failed: {err}");

                self.paywall.rejected(
                    request_id,
                    PaymentRejected::new(RejectReason::FacilitatorError)
                        .with_message(format!("Failed to verify payment: {err}")),
                )
            })?;

        let valid = match response {
            VerifyResult::Valid(v) => v,
            VerifyResult::Invalid(iv) => {
                let mut rejected = PaymentRejected::new(RejectReason::FacilitatorRejected)
                    .with_detail("facilitator_reason", iv.invalid_reason);
                if let Some(payer) = iv.payer {
                    rejected = rejected.with_detail("payer", payer);
                }
                return Err(self.paywall.rejected(request_id, rejected));
            }
        };

        #[cfg(feature = "tracing")]
        tracing::debug!(request_id = %request_id, payer = %valid.payer, "Payment verified");

        self.payment_state.verified = Some(valid);

        Ok(self)
    }

    /// Settle the payment with the facilitator.
    ///
    /// `self.payment_state.settled` will be populated on success. A failure here
    /// leaves the invoice consumed; the buyer must request a new challenge.
    pub async fn settle(mut self) -> Result<Self, ErrorResponse> {
        let request_id = &self.payment_state.request_id;
        let settlement = self
            .paywall
            .facilitator
            .settle(&self.payment)
            .await
            .map_err(|err| {
                #[cfg(feature = "tracing")]
                tracing::error!(request_id = %request_id, "Facilitator settle failed: {err}");

                ErrorResponse::settlement_failed(request_id.clone(), err.to_string())
            })?;

        let settled = match settlement {
            SettleResult::Success(s) => s,
            SettleResult::Failed(f) => {
                #[cfg(feature = "tracing")]
                tracing::error!(
                    request_id = %request_id,
                    reason = %f.error_reason,
                    "Facilitator refused settlement"
                );
                return Err(ErrorResponse::settlement_failed(
                    request_id.clone(),
                    f.error_reason,
                ));
            }
        };

        #[cfg(feature = "tracing")]
        tracing::info!(
            request_id = %request_id,
            payer = %settled.payer,
            transaction = %settled.transaction,
            network = %settled.network,
            "Payment settled"
        );

        self.payment_state.settled = Some(settled);

        Ok(self)
    }

    /// Run the resource handler with the payment state attached to the request extensions.
    pub async fn run_handler<Fun, Fut, Res>(mut self, handler: Fun) -> Response<Res>
    where
        Fun: FnOnce(Request<Req>) -> Fut,
        Fut: Future<Output = Response<Res>>,
    {
        let request_id = self.payment_state.request_id.clone();
        self.request.extensions_mut().insert(self.payment_state);

        let mut response = handler(self.request).await;
        set_request_id(&mut response, &request_id);
        response
    }
}
