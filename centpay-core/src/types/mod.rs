//! Core types used across Centpay.

mod amount;
mod common;

pub use amount::*;
pub use common::*;
