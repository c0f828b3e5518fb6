//! Payload schemas and typed event families.
//!
//! - [`cart`]: cart lifecycle, keyed by cart id
//! - [`order`]: order lifecycle, keyed by order id
//! - [`payment`]: payment request and outcomes, keyed by order id

pub mod cart;
pub mod order;
pub mod payment;

use serde::{Deserialize, Deserializer};

/// Deserialize a missing or `null` field as its default.
///
/// Used where validation, not decoding, should reject absent data.
pub(crate) fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Option::unwrap_or_default)
}
