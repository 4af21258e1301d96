use http::{HeaderValue, StatusCode};
use serde::Serialize;
use centpay_core::{
    errors::RejectReason,
    header::HEADER_REQUEST_ID,
    transport::{PaymentChallenge, PaymentRejected, SettlementFailed},
    types::RequestId,
};

/// Represents an error response from the paywall.
///
/// Every variant is a protocol outcome rather than a crash: a fresh challenge,
/// a rejected credential, or a settlement failure after the invoice was burned.
#[derive(Debug, Clone)]
pub struct ErrorResponse {
    pub status: StatusCode,
    /// Echoed back in `X-Request-Id`.
    pub request_id: RequestId,
    pub body: ErrorBody,
}

#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum ErrorBody {
    /// Body is Boxed to reduce size of the enum.
    Challenge(Box<PaymentChallenge>),
    Rejected(PaymentRejected),
    SettlementFailed(SettlementFailed),
    Internal(InternalError),
}

#[derive(Debug, Clone, Serialize)]
pub struct InternalError {
    pub error: String,
    pub message: String,
}

impl ErrorResponse {
    /// `402` with a freshly minted invoice.
    pub fn payment_required(request_id: RequestId, challenge: PaymentChallenge) -> Self {
        ErrorResponse {
            status: StatusCode::PAYMENT_REQUIRED,
            request_id,
            body: ErrorBody::Challenge(Box::new(challenge)),
        }
    }

    /// `402` for a credential that does not pay any outstanding invoice.
    pub fn rejected(request_id: RequestId, rejected: PaymentRejected) -> Self {
        ErrorResponse {
            status: StatusCode::PAYMENT_REQUIRED,
            request_id,
            body: ErrorBody::Rejected(rejected),
        }
    }

    /// `502` when the authority could not settle a verified payment.
    pub fn settlement_failed(request_id: RequestId, reason: impl Into<String>) -> Self {
        ErrorResponse {
            status: StatusCode::BAD_GATEWAY,
            request_id,
            body: ErrorBody::SettlementFailed(SettlementFailed::new(reason)),
        }
    }

    pub fn server_error(request_id: RequestId, message: impl Into<String>) -> Self {
        ErrorResponse {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            request_id,
            body: ErrorBody::Internal(InternalError {
                error: "internal_error".to_string(),
                message: message.into(),
            }),
        }
    }

    /// The rejection reason, for `402` rejections only.
    pub fn reason(&self) -> Option<RejectReason> {
        match &self.body {
            ErrorBody::Rejected(rejected) => Some(rejected.reason),
            _ => None,
        }
    }

    pub fn request_id_header(&self) -> Option<HeaderValue> {
        HeaderValue::from_str(self.request_id.as_str()).ok()
    }
}

#[cfg(feature = "axum")]
impl axum::response::IntoResponse for ErrorResponse {
    fn into_response(self) -> axum::response::Response {
        let request_id = self.request_id_header();
        let mut response = (self.status, axum::extract::Json(self.body)).into_response();
        if let Some(val) = request_id {
            response.headers_mut().insert(HEADER_REQUEST_ID, val);
        }
        response
    }
}
