//! Cart lifecycle events, emitted by the cart service.
//!
//! | event_type | topic | payload |
//! |---|---|---|
//! | `item_added_to_cart` | `cart.item.added` | [`ItemAdded`] |
//! | `item_updated_in_cart` | `cart.item.updated` | [`ItemUpdated`] |
//! | `item_removed_from_cart` | `cart.item.removed` | [`ItemRemoved`] |
//! | `cart_cleared` | `cart.cleared` | [`CartCleared`] |
//! | `checkout_initiated` | `cart.checkout.initiated` | [`CheckoutInitiated`] |

use super::null_as_default;
use crate::event::DomainEvent;
use crate::money::Money;
use crate::topics::Topic;
use serde::{Deserialize, Serialize};

/// Whether an add created a new line or bumped an existing one.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AddAction {
    /// New line item
    Added,
    /// Quantity added to an existing line
    Updated,
}

/// Line item state after an add.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AddedItem {
    /// Product id
    pub product_id: u64,
    /// Line quantity after the add
    pub quantity: u32,
    /// Unit price captured at add time
    pub price_at_add: Money,
    /// `price_at_add * quantity`
    pub total_price: Money,
}

/// Product details captured at add time.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ProductSummary {
    /// Display name
    pub name: String,
    /// Catalog price
    pub price: Money,
}

/// `{cart_id, item:{product_id, quantity, price_at_add, total_price}, product:{name, price}, action}`
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ItemAdded {
    /// Cart id
    pub cart_id: String,
    /// Line after the add
    pub item: AddedItem,
    /// Product snapshot
    pub product: ProductSummary,
    /// New line or bumped line
    pub action: AddAction,
}

/// Quantity change of one line.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct UpdatedItem {
    /// Product id
    pub product_id: u64,
    /// Quantity before
    pub old_quantity: u32,
    /// Quantity after
    pub new_quantity: u32,
    /// Unit price captured at add time
    pub price_at_add: Money,
    /// `price_at_add * new_quantity`
    pub total_price: Money,
}

/// `{cart_id, item:{product_id, old_quantity, new_quantity, price_at_add, total_price}}`
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ItemUpdated {
    /// Cart id
    pub cart_id: String,
    /// Quantity change
    pub item: UpdatedItem,
}

/// A line that left the cart.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RemovedItem {
    /// Product id
    pub product_id: u64,
    /// Quantity at removal
    pub quantity: u32,
}

/// `{cart_id, removed_item:{product_id, quantity}}`
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ItemRemoved {
    /// Cart id
    pub cart_id: String,
    /// Removed line
    pub removed_item: RemovedItem,
}

/// A line removed by a clear.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ClearedItem {
    /// Product id
    pub product_id: u64,
    /// Quantity at clear time
    pub quantity: u32,
    /// Unit price captured at add time
    pub price_at_add: Money,
}

/// `{cart_id, cleared_items:[...], total_items_cleared}`
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CartCleared {
    /// Cart id
    pub cart_id: String,
    /// Lines removed
    pub cleared_items: Vec<ClearedItem>,
    /// Number of lines removed
    pub total_items_cleared: u32,
}

/// A line handed over at checkout.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CheckoutItem {
    /// Product id
    pub product_id: u64,
    /// Quantity
    pub quantity: u32,
    /// Unit price captured at add time
    pub price_at_add: Money,
    /// Display name, when the cart knows it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub product_name: Option<String>,
}

/// `{cart_id, checkout_id?, user_id?, items:[...], total_amount, total_items}`
///
/// `cart_id` and `items` decode leniently (absent or `null` becomes empty) so
/// that the order saga, not the decoder, rejects incomplete checkouts.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct CheckoutInitiated {
    /// Cart id
    #[serde(default, deserialize_with = "null_as_default")]
    pub cart_id: String,
    /// Stable token for this checkout (`{cart_id}:{sequence}`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checkout_id: Option<String>,
    /// Owning user, if known
    #[serde(default)]
    pub user_id: Option<String>,
    /// Lines being checked out
    #[serde(default, deserialize_with = "null_as_default")]
    pub items: Vec<CheckoutItem>,
    /// Cart total as computed by the cart
    #[serde(default, deserialize_with = "null_as_default")]
    pub total_amount: Money,
    /// Sum of quantities
    #[serde(default, deserialize_with = "null_as_default")]
    pub total_items: u32,
}

impl CheckoutInitiated {
    /// The checkout token, when the producer supplied a non-empty one.
    #[must_use]
    pub fn checkout_token(&self) -> Option<&str> {
        self.checkout_id.as_deref().filter(|token| !token.is_empty())
    }
}

/// Events on the cart lifecycle topics.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event_type", content = "payload")]
pub enum CartEvent {
    /// A product was added (or its quantity bumped)
    #[serde(rename = "item_added_to_cart")]
    ItemAdded(ItemAdded),
    /// A line's quantity was set
    #[serde(rename = "item_updated_in_cart")]
    ItemUpdated(ItemUpdated),
    /// A line was removed
    #[serde(rename = "item_removed_from_cart")]
    ItemRemoved(ItemRemoved),
    /// Every line was removed
    #[serde(rename = "cart_cleared")]
    Cleared(CartCleared),
    /// The cart was handed over for ordering
    #[serde(rename = "checkout_initiated")]
    CheckoutInitiated(CheckoutInitiated),
}

impl DomainEvent for CartEvent {
    const EVENT_TYPES: &'static [&'static str] = &[
        "item_added_to_cart",
        "item_updated_in_cart",
        "item_removed_from_cart",
        "cart_cleared",
        "checkout_initiated",
    ];

    fn event_type(&self) -> &'static str {
        match self {
            Self::ItemAdded(_) => "item_added_to_cart",
            Self::ItemUpdated(_) => "item_updated_in_cart",
            Self::ItemRemoved(_) => "item_removed_from_cart",
            Self::Cleared(_) => "cart_cleared",
            Self::CheckoutInitiated(_) => "checkout_initiated",
        }
    }

    fn topic(&self) -> Topic {
        match self {
            Self::ItemAdded(_) => Topic::CartItemAdded,
            Self::ItemUpdated(_) => Topic::CartItemUpdated,
            Self::ItemRemoved(_) => Topic::CartItemRemoved,
            Self::Cleared(_) => Topic::CartCleared,
            Self::CheckoutInitiated(_) => Topic::CheckoutInitiated,
        }
    }

    fn partition_key(&self) -> String {
        match self {
            Self::ItemAdded(e) => e.cart_id.clone(),
            Self::ItemUpdated(e) => e.cart_id.clone(),
            Self::ItemRemoved(e) => e.cart_id.clone(),
            Self::Cleared(e) => e.cart_id.clone(),
            Self::CheckoutInitiated(e) => e.cart_id.clone(),
        }
    }
}
