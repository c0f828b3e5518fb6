//! Cart operations.
//!
//! Each mutation saves the cart first and then publishes the matching cart
//! event keyed by cart id. A failed publish surfaces as
//! [`CartError::Publish`]; the saved change stays.

use crate::cart::{Cart, CartItem};
use crate::catalog::{Product, ProductCatalog};
use crate::error::CartError;
use crate::repository::CartRepository;
use checkout_core::environment::Clock;
use checkout_core::events::cart::{
    AddAction, AddedItem, CartCleared, CartEvent, CheckoutInitiated, CheckoutItem, ClearedItem,
    ItemAdded, ItemRemoved, ItemUpdated, ProductSummary, RemovedItem, UpdatedItem,
};
use checkout_core::money::Money;
use checkout_runtime::Publisher;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Cart contents with totals.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CartSummary {
    /// Cart id
    pub cart_id: String,
    /// Lines in insertion order
    pub items: Vec<CartItem>,
    /// Sum of quantities
    pub total_items: u32,
    /// Sum of line totals
    pub total_amount: Money,
}

impl From<&Cart> for CartSummary {
    fn from(cart: &Cart) -> Self {
        Self {
            cart_id: cart.id.clone(),
            items: cart.items.clone(),
            total_items: cart.total_items(),
            total_amount: cart.total_amount(),
        }
    }
}

/// What a checkout handed over to the order side.
#[derive(Clone, Debug, PartialEq)]
pub struct CheckoutReceipt {
    /// Token identifying this checkout (`{cart_id}:{sequence}`)
    pub checkout_id: String,
    /// The `checkout_initiated` payload that was published
    pub checkout: CheckoutInitiated,
}

/// Cart operations of the cart service.
pub struct CartService {
    repository: Arc<dyn CartRepository>,
    catalog: Arc<dyn ProductCatalog>,
    publisher: Arc<Publisher>,
    clock: Arc<dyn Clock>,
    // Serializes load-modify-save cycles
    writes: Mutex<()>,
}

impl CartService {
    /// Create a service.
    #[must_use]
    pub fn new(
        repository: Arc<dyn CartRepository>,
        catalog: Arc<dyn ProductCatalog>,
        publisher: Arc<Publisher>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            repository,
            catalog,
            publisher,
            clock,
            writes: Mutex::new(()),
        }
    }

    /// Cart by id, created empty on first use.
    ///
    /// # Errors
    ///
    /// [`CartError::Repository`] when the store fails.
    pub async fn get_or_create_cart(&self, cart_id: &str) -> Result<Cart, CartError> {
        if let Some(cart) = self.repository.get(cart_id).await? {
            return Ok(cart);
        }
        let cart = Cart::new(cart_id, self.clock.now());
        self.repository.save(&cart).await?;
        tracing::debug!(cart_id, "Cart created");
        Ok(cart)
    }

    /// Add `quantity` units of a product and publish `item_added_to_cart`.
    ///
    /// # Errors
    ///
    /// - [`CartError::InvalidQuantity`] for a zero quantity
    /// - [`CartError::Repository`] / [`CartError::Publish`] on infrastructure failures
    pub async fn add_item(
        &self,
        cart_id: &str,
        product_id: u64,
        quantity: u32,
    ) -> Result<(AddAction, CartItem), CartError> {
        if quantity == 0 {
            return Err(CartError::InvalidQuantity {
                product_id,
                quantity: 0,
            });
        }
        let product = self.resolve_product(product_id, quantity).await;

        let _guard = self.writes.lock().await;
        let mut cart = self.get_or_create_cart(cart_id).await?;
        let (action, line) =
            cart.add(product_id, product.name.clone(), quantity, product.price, self.clock.now());
        self.repository.save(&cart).await?;

        self.publisher
            .publish_event(&CartEvent::ItemAdded(ItemAdded {
                cart_id: cart_id.to_string(),
                item: AddedItem {
                    product_id,
                    quantity: line.quantity,
                    price_at_add: line.price_at_add,
                    total_price: line.total_price(),
                },
                product: ProductSummary {
                    name: product.name,
                    price: product.price,
                },
                action,
            }))
            .await?;

        tracing::info!(cart_id, product_id, quantity = line.quantity, ?action, "Item added to cart");
        Ok((action, line))
    }

    /// Set a line's quantity. Zero or less removes the line.
    ///
    /// Returns the updated line, or `None` when the line was removed or never
    /// existed (nothing is published in the latter case).
    ///
    /// # Errors
    ///
    /// - [`CartError::InvalidQuantity`] for quantities beyond `u32::MAX`
    /// - [`CartError::Repository`] / [`CartError::Publish`] on infrastructure failures
    pub async fn update_item(
        &self,
        cart_id: &str,
        product_id: u64,
        quantity: i64,
    ) -> Result<Option<CartItem>, CartError> {
        if quantity <= 0 {
            self.remove_item(cart_id, product_id).await?;
            return Ok(None);
        }
        let quantity = u32::try_from(quantity)
            .map_err(|_| CartError::InvalidQuantity { product_id, quantity })?;

        let _guard = self.writes.lock().await;
        let mut cart = self.get_or_create_cart(cart_id).await?;
        let Some(old_quantity) = cart.set_quantity(product_id, quantity, self.clock.now()) else {
            return Ok(None);
        };
        self.repository.save(&cart).await?;
        let Some(line) = cart.line(product_id).cloned() else {
            return Ok(None);
        };

        self.publisher
            .publish_event(&CartEvent::ItemUpdated(ItemUpdated {
                cart_id: cart_id.to_string(),
                item: UpdatedItem {
                    product_id,
                    old_quantity,
                    new_quantity: line.quantity,
                    price_at_add: line.price_at_add,
                    total_price: line.total_price(),
                },
            }))
            .await?;

        tracing::info!(cart_id, product_id, old_quantity, new_quantity = quantity, "Cart item updated");
        Ok(Some(line))
    }

    /// Remove a line and publish `item_removed_from_cart`. Returns whether a
    /// line was removed.
    ///
    /// # Errors
    ///
    /// [`CartError::Repository`] / [`CartError::Publish`] on infrastructure failures.
    pub async fn remove_item(&self, cart_id: &str, product_id: u64) -> Result<bool, CartError> {
        let _guard = self.writes.lock().await;
        let mut cart = self.get_or_create_cart(cart_id).await?;
        let Some(removed) = cart.remove(product_id, self.clock.now()) else {
            return Ok(false);
        };
        self.repository.save(&cart).await?;

        self.publisher
            .publish_event(&CartEvent::ItemRemoved(ItemRemoved {
                cart_id: cart_id.to_string(),
                removed_item: RemovedItem {
                    product_id,
                    quantity: removed.quantity,
                },
            }))
            .await?;

        tracing::info!(cart_id, product_id, "Item removed from cart");
        Ok(true)
    }

    /// Cart contents with totals.
    ///
    /// # Errors
    ///
    /// [`CartError::Repository`] when the store fails.
    pub async fn get_cart(&self, cart_id: &str) -> Result<CartSummary, CartError> {
        Ok(CartSummary::from(&self.get_or_create_cart(cart_id).await?))
    }

    /// Empty the cart. Publishes `cart_cleared` only if it had lines; returns
    /// whether it did.
    ///
    /// # Errors
    ///
    /// [`CartError::Repository`] / [`CartError::Publish`] on infrastructure failures.
    pub async fn clear_cart(&self, cart_id: &str) -> Result<bool, CartError> {
        let _guard = self.writes.lock().await;
        self.clear_locked(cart_id).await
    }

    /// Hand the cart over to the order side: publish `checkout_initiated`,
    /// then clear the cart.
    ///
    /// # Errors
    ///
    /// - [`CartError::EmptyCart`] when the cart has no lines
    /// - [`CartError::Repository`] / [`CartError::Publish`] on infrastructure failures
    pub async fn checkout(
        &self,
        cart_id: &str,
        user_id: Option<&str>,
    ) -> Result<CheckoutReceipt, CartError> {
        let _guard = self.writes.lock().await;
        let mut cart = self.get_or_create_cart(cart_id).await?;
        if cart.is_empty() {
            return Err(CartError::EmptyCart(cart_id.to_string()));
        }

        cart.checkouts += 1;
        let checkout_id = format!("{cart_id}:{}", cart.checkouts);
        self.repository.save(&cart).await?;

        let checkout = CheckoutInitiated {
            cart_id: cart_id.to_string(),
            checkout_id: Some(checkout_id.clone()),
            user_id: user_id.map(ToString::to_string),
            items: cart
                .items
                .iter()
                .map(|item| CheckoutItem {
                    product_id: item.product_id,
                    quantity: item.quantity,
                    price_at_add: item.price_at_add,
                    product_name: Some(item.product_name.clone()),
                })
                .collect(),
            total_amount: cart.total_amount(),
            total_items: cart.total_items(),
        };
        self.publisher
            .publish_event(&CartEvent::CheckoutInitiated(checkout.clone()))
            .await?;
        tracing::info!(cart_id, checkout_id = %checkout_id, total = %checkout.total_amount, "Checkout initiated");

        self.clear_locked(cart_id).await?;
        Ok(CheckoutReceipt {
            checkout_id,
            checkout,
        })
    }

    async fn clear_locked(&self, cart_id: &str) -> Result<bool, CartError> {
        let mut cart = self.get_or_create_cart(cart_id).await?;
        let cleared = cart.clear(self.clock.now());
        if cleared.is_empty() {
            return Ok(false);
        }
        self.repository.save(&cart).await?;

        self.publisher
            .publish_event(&CartEvent::Cleared(CartCleared {
                cart_id: cart_id.to_string(),
                total_items_cleared: u32::try_from(cleared.len()).unwrap_or(u32::MAX),
                cleared_items: cleared
                    .into_iter()
                    .map(|item| ClearedItem {
                        product_id: item.product_id,
                        quantity: item.quantity,
                        price_at_add: item.price_at_add,
                    })
                    .collect(),
            }))
            .await?;

        tracing::info!(cart_id, "Cart cleared");
        Ok(true)
    }

    async fn resolve_product(&self, product_id: u64, quantity: u32) -> Product {
        match self.catalog.get_product(product_id).await {
            Ok(Some(product)) if product.can_sell(quantity) => product,
            Ok(Some(product)) => {
                tracing::warn!(
                    product_id,
                    is_active = product.is_active,
                    inventory = product.inventory,
                    quantity,
                    "Product cannot be sold as requested, using fallback product"
                );
                Product::fallback(product_id)
            },
            Ok(None) => {
                tracing::warn!(product_id, "Product not found, using fallback product");
                Product::fallback(product_id)
            },
            Err(error) => {
                tracing::error!(product_id, error = %error, "Catalog lookup failed, using fallback product");
                Product::fallback(product_id)
            },
        }
    }
}
