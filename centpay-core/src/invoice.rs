//! Invoices: time-bounded, single-use offers to sell access to a resource.
//!
//! An [`Invoice`] is minted from [`InvoiceTerms`] whenever a buyer asks for the
//! resource without paying. It is never mutated afterwards; the paywall either
//! consumes it once or the sweeper drops it after it expires.

use std::{borrow::Borrow, fmt::Display, time::Duration};

use bon::Builder;
use chrono::{DateTime, SecondsFormat, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::{
    errors::Result,
    types::{AmountValue, RequestId, format_minor_units},
};

/// Default invoice lifetime: two minutes.
pub const DEFAULT_INVOICE_TTL: Duration = Duration::from_millis(120_000);

/// Opaque single-use token identifying one invoice.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InvoiceNonce(pub String);

impl InvoiceNonce {
    /// A fresh random nonce (UUID v4, 122 bits of entropy).
    pub fn generate() -> Self {
        InvoiceNonce(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for InvoiceNonce {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl Display for InvoiceNonce {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for InvoiceNonce {
    fn from(value: &str) -> Self {
        InvoiceNonce(value.to_string())
    }
}

/// Human-readable price, e.g. `{"amount": "0.01", "currency": "USDC"}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Price {
    pub amount: String,
    pub currency: String,
}

/// The on-chain (or otherwise settled) asset a price is paid in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetInfo {
    pub address: String,
    pub decimals: u8,
    pub symbol: String,
}

/// Seller-side pricing and routing configuration that invoices are minted from.
#[derive(Builder, Debug, Clone, PartialEq, Eq)]
pub struct InvoiceTerms {
    /// Price in currency minor units (cents).
    pub price_cents: u64,
    #[builder(into)]
    pub currency: String,
    /// Settlement network identifier, opaque to the protocol.
    #[builder(into)]
    pub network: String,
    /// Settlement scheme understood by the facilitator, e.g. `exact`.
    #[builder(into, default = String::from("exact"))]
    pub scheme: String,
    pub facilitator_url: Url,
    /// Destination identifier for funds; doubles as the seller id.
    #[builder(into)]
    pub pay_to: String,
    #[builder(into)]
    pub seller_name: String,
    #[builder(into)]
    pub policy_label: String,
    pub asset: AssetInfo,
    /// Canonical identifier of the gated resource.
    pub resource: Url,
    #[builder(into, default = String::from("application/json"))]
    pub mime_type: String,
    #[builder(default = DEFAULT_INVOICE_TTL)]
    pub ttl: Duration,
}

impl InvoiceTerms {
    pub fn price(&self) -> Price {
        Price {
            amount: format_minor_units(self.price_cents),
            currency: self.currency.clone(),
        }
    }

    /// The price in the asset's atomic units.
    ///
    /// Fails when `price_cents` cannot be scaled to `asset.decimals`; such terms can
    /// never be paid and should be refused at startup.
    pub fn atomic_price(&self) -> Result<AmountValue> {
        AmountValue::from_minor_units(self.price_cents, self.asset.decimals)
    }

    /// Mint a new invoice with a fresh nonce, valid from `now` for `self.ttl`.
    pub fn issue(&self, request_id: &RequestId, now: DateTime<Utc>) -> Result<Invoice> {
        let atomic_price = self.atomic_price()?;
        let ttl = TimeDelta::from_std(self.ttl).unwrap_or(TimeDelta::MAX);
        let expires_at = now
            .checked_add_signed(ttl)
            .unwrap_or(DateTime::<Utc>::MAX_UTC);

        Ok(Invoice {
            nonce: InvoiceNonce::generate(),
            request_id: request_id.clone(),
            price: self.price(),
            price_cents: self.price_cents,
            atomic_price,
            resource: self.resource.clone(),
            mime_type: self.mime_type.clone(),
            pay_to: self.pay_to.clone(),
            seller_name: self.seller_name.clone(),
            policy_label: self.policy_label.clone(),
            network: self.network.clone(),
            scheme: self.scheme.clone(),
            asset: self.asset.clone(),
            facilitator_url: self.facilitator_url.clone(),
            created_at: now,
            expires_at,
        })
    }
}

/// One outstanding offer to sell one access to the resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invoice {
    pub nonce: InvoiceNonce,
    /// Correlation id of the request that minted this invoice.
    pub request_id: RequestId,
    pub price: Price,
    pub price_cents: u64,
    /// `price_cents` scaled to the asset's decimals.
    pub atomic_price: AmountValue,
    pub resource: Url,
    pub mime_type: String,
    pub pay_to: String,
    pub seller_name: String,
    pub policy_label: String,
    pub network: String,
    pub scheme: String,
    pub asset: AssetInfo,
    pub facilitator_url: Url,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl Invoice {
    /// Whether the invoice may still be paid at `now` (`now < expires_at`).
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        now < self.expires_at
    }

    pub fn lifetime(&self) -> TimeDelta {
        self.expires_at - self.created_at
    }

    pub fn ttl_ms(&self) -> u64 {
        u64::try_from(self.lifetime().num_milliseconds()).unwrap_or(0)
    }

    /// Lifetime rounded up to whole seconds, at least one.
    pub fn timeout_seconds(&self) -> u64 {
        self.ttl_ms().div_ceil(1000).max(1)
    }
}

/// RFC 3339 with millisecond precision, e.g. `2025-01-01T00:00:00.000Z`.
pub fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}
