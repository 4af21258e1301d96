//! Centpay core library.
//!
//! Protocol primitives shared by the paywall (server) and the paying agent (client):
//!
//! - [`invoice`]: invoices (payment challenges) and the terms they are minted from.
//! - [`store`]: the concurrent invoice store with at-most-once consumption.
//! - [`header`]: the `X-PAYMENT` header codec.
//! - [`facilitator`]: the settlement authority interface and its in-memory mock.
//! - [`transport`]: JSON bodies exchanged with buyers and with the authority.
//! - [`types`]: amounts, protocol version markers and other small types.

pub mod errors;
pub mod facilitator;
pub mod header;
pub mod invoice;
pub mod store;
pub mod transport;
pub mod types;
