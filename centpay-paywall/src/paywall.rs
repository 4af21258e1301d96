//! HTTP paywall gating a resource behind single-use invoices.
//!
//! For details, see the [`PayWall`] struct documentation.

use bon::Builder;
use chrono::Utc;
use http::{HeaderValue, Request, Response};
use centpay_core::{
    errors::RejectReason,
    facilitator::{Facilitator, PaymentRequest},
    header::{self, HEADER_PAYMENT, HEADER_REQUEST_ID},
    invoice::InvoiceTerms,
    store::InvoiceStore,
    transport::{PaymentChallenge, PaymentRejected},
    types::RequestId,
};

use crate::{
    errors::ErrorResponse,
    processor::{PaymentState, RequestProcessor},
};

/// A HTTP paywall that mints invoices and uses a facilitator to verify and settle payments.
///
/// ## Type Parameters
///
/// - `F`: The facilitator type that implements [`Facilitator`] for payment verification and settlement.
///
/// ## Building a PayWall
///
/// Use the builder pattern to construct a `PayWall`. You need:
/// - A facilitator for payment verification/settlement
/// - The [`InvoiceTerms`] new invoices are minted from
/// - Optionally, a shared [`InvoiceStore`] (one is created otherwise)
///
/// ## Step-by-Step API
///
/// The [`handle_payment`](PayWall::handle_payment) method runs the standard flow:
///
/// 1. **Process Request** ([`process_request`](PayWall::process_request)): Answers a request
///    without `X-PAYMENT` with a fresh challenge, decodes the header otherwise, and consumes
///    the matching invoice.
/// 2. **Verify** ([`RequestProcessor::verify`]): Verifies the credential with the facilitator.
/// 3. **Settle** ([`RequestProcessor::settle`]): Settles before the resource is produced.
/// 4. **Run Handler** ([`RequestProcessor::run_handler`]): Executes the resource handler,
///    injecting [`PaymentState`] into request extensions.
///
/// Once an invoice is consumed in step 1 it is never restored, whatever happens afterwards.
#[derive(Builder, Debug, Clone)]
pub struct PayWall<F: Facilitator> {
    /// The facilitator to use for payment verification and settlement.
    pub facilitator: F,
    /// What each invoice sells and for how much.
    pub terms: InvoiceTerms,
    /// Outstanding invoices. Clones of the paywall share it.
    #[builder(default)]
    pub store: InvoiceStore,
}

impl<F: Facilitator> PayWall<F> {
    /// Entrypoint of a payment flow.
    ///
    /// Extracts the payment credential and consumes the invoice it pays.
    /// Returns a [`RequestProcessor`] on success for further processing.
    pub fn process_request<'pw, Req>(
        &'pw self,
        request: Request<Req>,
    ) -> Result<RequestProcessor<'pw, F, Req>, ErrorResponse> {
        let request_id = RequestId::from_header_or_new(
            request
                .headers()
                .get(HEADER_REQUEST_ID)
                .and_then(|h| h.to_str().ok()),
        );

        let Some(raw) = request.headers().get(HEADER_PAYMENT) else {
            return Err(self.payment_required(request_id));
        };

        let raw = raw.to_str().map_err(|err| {
            self.rejected(
                &request_id,
                PaymentRejected::new(RejectReason::InvalidHeader)
                    .with_message(format!("Failed to decode X-PAYMENT header: {err}")),
            )
        })?;

        let credential = header::decode(raw).map_err(|err| {
            self.rejected(
                &request_id,
                PaymentRejected::new(err.reason()).with_message(err.to_string()),
            )
        })?;

        let accepted = self.facilitator.scheme();
        if credential.scheme != accepted {
            return Err(self.rejected(
                &request_id,
                PaymentRejected::new(RejectReason::UnsupportedScheme)
                    .with_message(format!("This server accepts `{accepted}` payments")),
            ));
        }

        let invoice = self
            .store
            .take_if_valid(credential.nonce.as_str(), Utc::now())
            .ok_or_else(|| {
                self.rejected(
                    &request_id,
                    PaymentRejected::new(RejectReason::UnknownInvoice)
                        .with_message("Invoice is unknown, already used, or expired"),
                )
            })?;

        #[cfg(feature = "tracing")]
        tracing::debug!(request_id = %request_id, nonce = %invoice.nonce, "Invoice consumed");

        let payment = PaymentRequest::new(credential, invoice);

        let payment_state = PaymentState {
            request_id: request_id.clone(),
            invoice: payment.invoice.clone(),
            verified: None,
            settled: None,
        };

        Ok(RequestProcessor {
            paywall: self,
            request,
            payment,
            payment_state,
        })
    }

    /// Standard payment handling flow.
    ///
    /// This handler will **consume** the invoice, **verify** the payment, **settle** it, and
    /// then **run** the provided resource handler. The response carries `X-Request-Id`.
    pub async fn handle_payment<Fun, Fut, Req, Res>(
        self,
        request: Request<Req>,
        handler: Fun,
    ) -> Result<Response<Res>, ErrorResponse>
    where
        Fun: FnOnce(Request<Req>) -> Fut,
        Fut: Future<Output = Response<Res>>,
    {
        let response = self
            .process_request(request)?
            .verify()
            .await?
            .settle()
            .await?
            .run_handler(handler)
            .await;

        Ok(response)
    }

    /// Mint and store a fresh invoice, returning the `402` challenge for it.
    pub fn payment_required(&self, request_id: RequestId) -> ErrorResponse {
        let invoice = match self.terms.issue(&request_id, Utc::now()) {
            Ok(invoice) => invoice,
            Err(err) => {
                return ErrorResponse::server_error(
                    request_id,
                    format!("Failed to price invoice: {err}"),
                );
            }
        };
        let challenge = PaymentChallenge::from(&invoice);

        #[cfg(feature = "tracing")]
        let nonce = invoice.nonce.clone();

        if let Err(err) = self.store.put(invoice) {
            return ErrorResponse::server_error(request_id, format!("Failed to store invoice: {err}"));
        }

        #[cfg(feature = "tracing")]
        tracing::info!(
            request_id = %request_id,
            nonce = %nonce,
            price = %challenge.price.amount,
            currency = %challenge.price.currency,
            "Issued payment challenge"
        );

        ErrorResponse::payment_required(request_id, challenge)
    }

    /// Credential rejected before settlement.
    pub fn rejected(&self, request_id: &RequestId, rejected: PaymentRejected) -> ErrorResponse {
        #[cfg(feature = "tracing")]
        tracing::info!(request_id = %request_id, reason = %rejected.reason, "Payment rejected");

        ErrorResponse::rejected(request_id.clone(), rejected)
    }
}

/// Stamp `X-Request-Id` on a response.
pub(crate) fn set_request_id<Res>(response: &mut Response<Res>, request_id: &RequestId) {
    if let Ok(value) = HeaderValue::from_str(request_id.as_str()) {
        response.headers_mut().insert(HEADER_REQUEST_ID, value);
    }
}
