//! The cart aggregate.
//!
//! Lines keep insertion order and `product_id` is unique within a cart.
//! Prices are captured when a line is added and re-captured when the same
//! product is added again.

use checkout_core::events::cart::AddAction;
use checkout_core::money::Money;
use chrono::{DateTime, Utc};

/// One product line of a cart.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CartItem {
    /// Catalog product id
    pub product_id: u64,
    /// Display name captured at add time
    pub product_name: String,
    /// Units in the cart, always positive
    pub quantity: u32,
    /// Unit price captured at add time
    pub price_at_add: Money,
}

impl CartItem {
    /// `price_at_add * quantity`
    #[must_use]
    pub const fn total_price(&self) -> Money {
        self.price_at_add.saturating_multiply(self.quantity)
    }
}

/// A shopping cart, keyed by session or user id.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Cart {
    /// Cart id
    pub id: String,
    /// Lines in insertion order
    pub items: Vec<CartItem>,
    /// Checkouts performed so far; the next checkout token uses `checkouts + 1`
    pub checkouts: u64,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Last change
    pub updated_at: DateTime<Utc>,
}

impl Cart {
    /// An empty cart.
    #[must_use]
    pub fn new(id: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            id: id.into(),
            items: Vec::new(),
            checkouts: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// Line for `product_id`, if present.
    #[must_use]
    pub fn line(&self, product_id: u64) -> Option<&CartItem> {
        self.items.iter().find(|item| item.product_id == product_id)
    }

    /// Add `quantity` units, merging into an existing line.
    ///
    /// A merged line takes the new name and price.
    pub fn add(
        &mut self,
        product_id: u64,
        product_name: String,
        quantity: u32,
        price: Money,
        now: DateTime<Utc>,
    ) -> (AddAction, CartItem) {
        self.updated_at = now;
        if let Some(line) = self.items.iter_mut().find(|item| item.product_id == product_id) {
            line.quantity = line.quantity.saturating_add(quantity);
            line.price_at_add = price;
            line.product_name = product_name;
            return (AddAction::Updated, line.clone());
        }

        let line = CartItem {
            product_id,
            product_name,
            quantity,
            price_at_add: price,
        };
        self.items.push(line.clone());
        (AddAction::Added, line)
    }

    /// Set the quantity of an existing line. Returns the previous quantity.
    pub fn set_quantity(&mut self, product_id: u64, quantity: u32, now: DateTime<Utc>) -> Option<u32> {
        let line = self.items.iter_mut().find(|item| item.product_id == product_id)?;
        let previous = line.quantity;
        line.quantity = quantity;
        self.updated_at = now;
        Some(previous)
    }

    /// Remove a line.
    pub fn remove(&mut self, product_id: u64, now: DateTime<Utc>) -> Option<CartItem> {
        let index = self.items.iter().position(|item| item.product_id == product_id)?;
        self.updated_at = now;
        Some(self.items.remove(index))
    }

    /// Remove every line, returning them.
    pub fn clear(&mut self, now: DateTime<Utc>) -> Vec<CartItem> {
        if !self.items.is_empty() {
            self.updated_at = now;
        }
        std::mem::take(&mut self.items)
    }

    /// Sum of line totals.
    #[must_use]
    pub fn total_amount(&self) -> Money {
        self.items.iter().map(CartItem::total_price).sum()
    }

    /// Sum of quantities.
    #[must_use]
    pub fn total_items(&self) -> u32 {
        self.items
            .iter()
            .fold(0_u32, |total, item| total.saturating_add(item.quantity))
    }

    /// Whether the cart has no lines.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn now() -> DateTime<Utc> {
        DateTime::<Utc>::from_timestamp(1_735_689_600, 0).unwrap_or_default()
    }

    #[test]
    fn adding_same_product_merges_and_recaptures_price() {
        let mut cart = Cart::new("c-1", now());

        let (first, _) = cart.add(7, "Lamp".to_string(), 1, Money::from_cents(1000), now());
        let (second, line) = cart.add(7, "Lamp".to_string(), 2, Money::from_cents(1200), now());

        assert_eq!(first, AddAction::Added);
        assert_eq!(second, AddAction::Updated);
        assert_eq!(line.quantity, 3);
        assert_eq!(line.price_at_add, Money::from_cents(1200));
        assert_eq!(cart.items.len(), 1);
    }

    #[test]
    fn lines_keep_insertion_order() {
        let mut cart = Cart::new("c-1", now());
        for id in [3, 1, 2] {
            cart.add(id, format!("Product {id}"), 1, Money::from_cents(100), now());
        }
        cart.add(1, "Product 1".to_string(), 1, Money::from_cents(100), now());

        let ids: Vec<u64> = cart.items.iter().map(|item| item.product_id).collect();
        assert_eq!(ids, vec![3, 1, 2]);
    }

    #[test]
    fn totals_sum_all_lines() {
        let mut cart = Cart::new("c-1", now());
        cart.add(1, "A".to_string(), 2, Money::from_cents(1000), now());
        cart.add(2, "B".to_string(), 1, Money::from_cents(550), now());

        assert_eq!(cart.total_amount(), Money::from_cents(2550));
        assert_eq!(cart.total_items(), 3);
    }

    #[test]
    fn set_quantity_and_remove_report_previous_state() {
        let mut cart = Cart::new("c-1", now());
        cart.add(1, "A".to_string(), 2, Money::from_cents(1000), now());

        assert_eq!(cart.set_quantity(1, 5, now()), Some(2));
        assert_eq!(cart.set_quantity(9, 5, now()), None);
        assert_eq!(cart.remove(1, now()).map(|line| line.quantity), Some(5));
        assert!(cart.remove(1, now()).is_none());
        assert!(cart.is_empty());
    }

    #[test]
    fn clear_returns_removed_lines() {
        let mut cart = Cart::new("c-1", now());
        cart.add(1, "A".to_string(), 2, Money::from_cents(1000), now());

        let removed = cart.clear(now());

        assert_eq!(removed.len(), 1);
        assert!(cart.is_empty());
        assert!(cart.clear(now()).is_empty());
    }
}
