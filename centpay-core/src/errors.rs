use std::fmt::Display;

use serde::{Deserialize, Serialize};

/// Error types for core operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// JSON serialization/deserialization errors.
    #[error("Serde JSON error: {0}")]
    SerdeJsonError(#[from] serde_json::Error),

    /// An invoice with the same nonce is already outstanding.
    #[error("Duplicate invoice nonce: {0}")]
    DuplicateNonce(String),

    /// A price could not be expressed in the asset's atomic units.
    #[error("Amount overflow converting {minor_units} minor units to {decimals} decimals")]
    AmountOverflow { minor_units: u64, decimals: u8 },
}

/// A specialized `Result` type for core operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Why a payment attempt was turned away with `402 Payment Required`.
///
/// This is a closed set. `UnknownInvoice` deliberately covers "never issued",
/// "already consumed" and "expired" alike.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectReason {
    MissingHeader,
    InvalidHeader,
    UnsupportedScheme,
    MissingInvoiceNonce,
    UnknownInvoice,
    FacilitatorRejected,
    FacilitatorError,
}

impl RejectReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            RejectReason::MissingHeader => "missing_header",
            RejectReason::InvalidHeader => "invalid_header",
            RejectReason::UnsupportedScheme => "unsupported_scheme",
            RejectReason::MissingInvoiceNonce => "missing_invoice_nonce",
            RejectReason::UnknownInvoice => "unknown_invoice",
            RejectReason::FacilitatorRejected => "facilitator_rejected",
            RejectReason::FacilitatorError => "facilitator_error",
        }
    }
}

impl Display for RejectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reject_reason_wire_names() {
        let all = [
            RejectReason::MissingHeader,
            RejectReason::InvalidHeader,
            RejectReason::UnsupportedScheme,
            RejectReason::MissingInvoiceNonce,
            RejectReason::UnknownInvoice,
            RejectReason::FacilitatorRejected,
            RejectReason::FacilitatorError,
        ];

        for reason in all {
            assert_eq!(
                serde_json::to_value(reason).unwrap(),
                serde_json::json!(reason.as_str())
            );
        }
    }
}
