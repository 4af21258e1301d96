//! The `X-PAYMENT` header: `"<scheme> <payload>"`.
//!
//! Two schemes are understood:
//!
//! - `demo`: the payload is the bare invoice nonce, e.g. `demo 3f0c...`.
//! - `x402`: the payload is a JSON object encoded as base64url. The invoice
//!   nonce is looked up inside the object, see [`NONCE_POINTERS`].
//!
//! Decoding never panics; every malformed input maps to a [`DecodeError`]
//! which in turn maps to a [`RejectReason`].

use std::{fmt::Display, str::FromStr};

use base64::{
    Engine,
    alphabet,
    engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig, general_purpose::URL_SAFE_NO_PAD},
};
use serde::{Deserialize, Serialize};

use crate::{
    errors::{RejectReason, Result},
    invoice::InvoiceNonce,
    types::AnyJson,
};

/// Header carrying the payment credential (`X-PAYMENT`).
pub const HEADER_PAYMENT: &str = "x-payment";

/// Header carrying the request correlation id (`X-Request-Id`).
pub const HEADER_REQUEST_ID: &str = "x-request-id";

/// Where the invoice nonce may live inside an `x402` payload, in order of
/// precedence. The first pointer resolving to a non-empty string wins.
pub const NONCE_POINTERS: [&str; 5] = [
    "/payload/authorization/nonce",
    "/payload/nonce",
    "/invoice_nonce",
    "/nonce",
    "/extra/invoice_nonce",
];

/// Accepts both base64 alphabets once normalised to url-safe, padded or not.
const TOLERANT_BASE64: GeneralPurpose = GeneralPurpose::new(
    &alphabet::URL_SAFE,
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentScheme {
    Demo,
    X402,
}

impl PaymentScheme {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentScheme::Demo => "demo",
            PaymentScheme::X402 => "x402",
        }
    }
}

impl Display for PaymentScheme {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PaymentScheme {
    type Err = DecodeError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        if s.eq_ignore_ascii_case("demo") {
            Ok(PaymentScheme::Demo)
        } else if s.eq_ignore_ascii_case("x402") {
            Ok(PaymentScheme::X402)
        } else {
            Err(DecodeError::UnsupportedScheme(s.to_string()))
        }
    }
}

/// Why a header value could not be turned into a [`PaymentCredential`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    #[error("Payment header is empty")]
    Empty,

    #[error("Payment header must be \"<scheme> <payload>\"")]
    MissingScheme,

    #[error("Unsupported payment scheme: {0}")]
    UnsupportedScheme(String),

    #[error("Malformed payment payload: {0}")]
    MalformedPayload(String),

    #[error("Payment payload carries no invoice nonce")]
    MissingNonce,
}

impl DecodeError {
    pub fn reason(&self) -> RejectReason {
        match self {
            DecodeError::Empty => RejectReason::MissingHeader,
            DecodeError::MissingScheme | DecodeError::MalformedPayload(_) => {
                RejectReason::InvalidHeader
            }
            DecodeError::UnsupportedScheme(_) => RejectReason::UnsupportedScheme,
            DecodeError::MissingNonce => RejectReason::MissingInvoiceNonce,
        }
    }
}

/// A decoded payment credential, valid for at most one invoice.
#[derive(Debug, Clone, PartialEq)]
pub struct PaymentCredential {
    pub scheme: PaymentScheme,
    pub nonce: InvoiceNonce,
    /// The decoded proof object for `x402`; `None` for `demo`.
    pub proof: Option<AnyJson>,
}

impl PaymentCredential {
    pub fn demo(nonce: InvoiceNonce) -> Self {
        PaymentCredential {
            scheme: PaymentScheme::Demo,
            nonce,
            proof: None,
        }
    }

    /// Wrap an `x402` proof object, extracting its invoice nonce.
    pub fn x402(proof: AnyJson) -> std::result::Result<Self, DecodeError> {
        if !proof.is_object() {
            return Err(DecodeError::MalformedPayload(
                "payload is not a JSON object".to_string(),
            ));
        }
        let nonce = extract_nonce(&proof).ok_or(DecodeError::MissingNonce)?;
        Ok(PaymentCredential {
            scheme: PaymentScheme::X402,
            nonce,
            proof: Some(proof),
        })
    }

    /// The JSON forwarded to a facilitator as `paymentPayload`.
    pub fn payload(&self) -> AnyJson {
        match &self.proof {
            Some(proof) => proof.clone(),
            None => serde_json::json!({ "invoice_nonce": self.nonce }),
        }
    }

    pub fn encode(&self) -> Result<String> {
        encode(self)
    }
}

/// Encode a credential as an `X-PAYMENT` header value.
pub fn encode(credential: &PaymentCredential) -> Result<String> {
    match credential.scheme {
        PaymentScheme::Demo => Ok(format!("demo {}", credential.nonce)),
        PaymentScheme::X402 => {
            let json = serde_json::to_vec(&credential.payload())?;
            Ok(format!("x402 {}", URL_SAFE_NO_PAD.encode(json)))
        }
    }
}

/// Decode an `X-PAYMENT` header value.
pub fn decode(header: &str) -> std::result::Result<PaymentCredential, DecodeError> {
    let trimmed = header.trim();
    if trimmed.is_empty() {
        return Err(DecodeError::Empty);
    }

    let (token, payload) = trimmed
        .split_once(char::is_whitespace)
        .ok_or(DecodeError::MissingScheme)?;
    let payload = payload.trim();
    if payload.is_empty() {
        return Err(DecodeError::MissingScheme);
    }

    match token.parse::<PaymentScheme>()? {
        PaymentScheme::Demo => {
            if payload.contains(char::is_whitespace) {
                return Err(DecodeError::MalformedPayload(
                    "demo payload must be a single token".to_string(),
                ));
            }
            Ok(PaymentCredential::demo(InvoiceNonce(payload.to_string())))
        }
        PaymentScheme::X402 => {
            let bytes = decode_base64(payload)?;
            let proof: AnyJson = serde_json::from_slice(&bytes)
                .map_err(|e| DecodeError::MalformedPayload(e.to_string()))?;
            PaymentCredential::x402(proof)
        }
    }
}

fn decode_base64(payload: &str) -> std::result::Result<Vec<u8>, DecodeError> {
    let normalised: String = payload
        .chars()
        .map(|c| match c {
            '+' => '-',
            '/' => '_',
            c => c,
        })
        .collect();
    TOLERANT_BASE64
        .decode(normalised)
        .map_err(|e| DecodeError::MalformedPayload(e.to_string()))
}

/// Find the invoice nonce inside an `x402` proof object.
pub fn extract_nonce(proof: &AnyJson) -> Option<InvoiceNonce> {
    NONCE_POINTERS.iter().find_map(|pointer| {
        proof
            .pointer(pointer)
            .and_then(AnyJson::as_str)
            .map(str::trim)
            .filter(|nonce| !nonce.is_empty())
            .map(InvoiceNonce::from)
    })
}

/// Normalise a pre-scoped header token handed out by an authorizer.
///
/// A value already starting with a known scheme token is kept as is;
/// anything else is assumed to be an `x402` payload.
pub fn with_scheme_prefix(raw: &str) -> String {
    let trimmed = raw.trim();
    let scoped = trimmed
        .split_once(char::is_whitespace)
        .is_some_and(|(token, _)| token.parse::<PaymentScheme>().is_ok());
    if scoped {
        trimmed.to_string()
    } else {
        format!("x402 {trimmed}")
    }
}
