//! [`AmountValue`] represents a monetary amount in an asset's atomic units.
//!
//! Prices are configured in currency minor units (cents, scale 2). Facilitators
//! expect the asset's atomic units, whose scale is the asset's `decimals`.
//! Conversion between the two is integer-only.

use std::fmt::Display;

use serde::{Deserialize, Serialize};

use crate::errors::{Error, Result};

/// Number of decimal places in a currency minor unit (1 cent = 0.01).
pub const MINOR_UNIT_DECIMALS: u8 = 2;

/// Represents a monetary amount in an asset's smallest units.
///
/// Uses a `u128` internally to support large values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct AmountValue(pub u128);

impl AmountValue {
    /// Convert a price in minor units (cents) into the atomic units of an asset
    /// with `decimals` decimal places.
    ///
    /// Scales up by `10^(decimals - 2)` or down by `10^(2 - decimals)`; scaling
    /// down truncates.
    ///
    /// ```
    /// use centpay_core::types::AmountValue;
    ///
    /// assert_eq!(AmountValue::from_minor_units(1, 6).unwrap(), AmountValue(10_000));
    /// assert_eq!(AmountValue::from_minor_units(150, 0).unwrap(), AmountValue(1));
    /// ```
    pub fn from_minor_units(minor_units: u64, decimals: u8) -> Result<Self> {
        let minor = u128::from(minor_units);
        let converted = if decimals >= MINOR_UNIT_DECIMALS {
            10u128
                .checked_pow(u32::from(decimals - MINOR_UNIT_DECIMALS))
                .and_then(|scale| minor.checked_mul(scale))
        } else {
            10u128
                .checked_pow(u32::from(MINOR_UNIT_DECIMALS - decimals))
                .map(|scale| minor / scale)
        };

        converted.map(AmountValue).ok_or(Error::AmountOverflow {
            minor_units,
            decimals,
        })
    }
}

/// Render minor units as a decimal string with two places, e.g. `1` -> `"0.01"`.
pub fn format_minor_units(minor_units: u64) -> String {
    format!("{}.{:02}", minor_units / 100, minor_units % 100)
}

impl From<u8> for AmountValue {
    fn from(value: u8) -> Self {
        AmountValue(value as u128)
    }
}

impl From<u16> for AmountValue {
    fn from(value: u16) -> Self {
        AmountValue(value as u128)
    }
}

impl From<u32> for AmountValue {
    fn from(value: u32) -> Self {
        AmountValue(value as u128)
    }
}

impl From<u64> for AmountValue {
    fn from(value: u64) -> Self {
        AmountValue(value as u128)
    }
}

impl From<u128> for AmountValue {
    fn from(value: u128) -> Self {
        AmountValue(value)
    }
}

impl Display for AmountValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Serialize for AmountValue {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for AmountValue {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        let value = s.parse::<u128>().map_err(serde::de::Error::custom)?;
        Ok(AmountValue(value))
    }
}
