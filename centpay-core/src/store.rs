//! Outstanding invoices, keyed by nonce.
//!
//! The only correctness-critical shared state of the paywall. Every removal,
//! whether by a buyer consuming an invoice or by the expiry sweep, goes through
//! the map's atomic remove so an invoice is handed out at most once.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::{DashMap, mapref::entry::Entry};

use crate::{
    errors::{Error, Result},
    invoice::{Invoice, InvoiceNonce},
};

/// Concurrent invoice store. Clones share the same underlying map.
#[derive(Debug, Clone, Default)]
pub struct InvoiceStore {
    invoices: Arc<DashMap<InvoiceNonce, Invoice>>,
}

impl InvoiceStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a freshly minted invoice. Fails if the nonce is already outstanding.
    pub fn put(&self, invoice: Invoice) -> Result<()> {
        match self.invoices.entry(invoice.nonce.clone()) {
            Entry::Occupied(_) => Err(Error::DuplicateNonce(invoice.nonce.to_string())),
            Entry::Vacant(slot) => {
                slot.insert(invoice);
                Ok(())
            }
        }
    }

    /// Remove and return the invoice for `nonce` if it is still valid at `now`.
    ///
    /// Returns `None` for unknown, already consumed and expired nonces alike.
    /// An expired invoice found here is dropped as well.
    pub fn take_if_valid(&self, nonce: &str, now: DateTime<Utc>) -> Option<Invoice> {
        let (_, invoice) = self.invoices.remove(nonce)?;
        if invoice.is_valid_at(now) {
            Some(invoice)
        } else {
            #[cfg(feature = "tracing")]
            tracing::debug!(nonce = %invoice.nonce, "Dropped expired invoice on lookup");
            None
        }
    }

    /// Remove every invoice with `expires_at <= now`. Returns how many were removed.
    pub fn sweep_expired(&self, now: DateTime<Utc>) -> usize {
        let mut removed = 0;
        self.invoices.retain(|_, invoice| {
            let keep = invoice.is_valid_at(now);
            if !keep {
                removed += 1;
            }
            keep
        });
        removed
    }

    pub fn contains(&self, nonce: &str) -> bool {
        self.invoices.contains_key(nonce)
    }

    pub fn len(&self) -> usize {
        self.invoices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.invoices.is_empty()
    }
}
