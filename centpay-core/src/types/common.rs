//! Miscellaneous common types used throughout the Centpay codebase.

use std::fmt::Display;

use serde::{Deserialize, Serialize};

/// Represents any JSON value. Used for serializing/deserializing arbitrary JSON data.
pub type AnyJson = serde_json::Value;

/// Version of the challenge body format served with `402 Payment Required`.
pub const PROTOCOL_VERSION: &str = "2025-01";

/// Represents the X402 facilitator protocol version 1, serialized as `"x402Version": 1`.
///
/// ```
/// use serde::{Serialize, Deserialize};
/// use centpay_core::types::X402V1;
///
/// #[derive(Debug, Clone, Serialize, Deserialize)]
/// #[serde(rename_all = "camelCase")]
/// struct VerifyCall {
///     x402_version: X402V1,
/// }
///
/// let call: VerifyCall = serde_json::from_value(serde_json::json!({
///     "x402Version": 1,
/// })).unwrap();
///
/// assert_eq!(call.x402_version, X402V1);
/// assert!(serde_json::from_value::<VerifyCall>(serde_json::json!({ "x402Version": 2 })).is_err());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct X402V1;

impl Serialize for X402V1 {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_i8(1)
    }
}

impl<'de> Deserialize<'de> for X402V1 {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let v = i8::deserialize(deserializer)?;
        match v {
            1 => Ok(X402V1),
            _ => Err(serde::de::Error::custom(format!(
                "Unsupported X402 version {}; expected 1",
                v
            ))),
        }
    }
}

impl Display for X402V1 {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "1")
    }
}

/// Request correlation identifier carried in `X-Request-Id`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(pub String);

impl RequestId {
    /// Echo the caller's identifier when it is usable, otherwise generate one.
    pub fn from_header_or_new(value: Option<&str>) -> Self {
        match value.map(str::trim) {
            Some(v) if !v.is_empty() => RequestId(v.to_string()),
            _ => RequestId::generate(),
        }
    }

    pub fn generate() -> Self {
        RequestId(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_id_echoes_caller_value() {
        assert_eq!(
            RequestId::from_header_or_new(Some("abc-123")),
            RequestId("abc-123".to_string())
        );
    }

    #[test]
    fn request_id_generated_when_missing_or_blank() {
        let a = RequestId::from_header_or_new(None);
        let b = RequestId::from_header_or_new(Some("   "));
        assert!(!a.as_str().is_empty());
        assert!(!b.as_str().is_empty());
        assert_ne!(a, b);
    }
}
