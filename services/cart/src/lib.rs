//! # Cart Service
//!
//! Shopping carts keyed by session or user id. Every change is published as a
//! cart lifecycle event keyed by cart id, and `checkout` hands the cart to the
//! order saga through `checkout_initiated`.
//!
//! Product data comes from a [`ProductCatalog`]; when the catalog cannot
//! vouch for a product the cart uses [`Product::fallback`] instead of failing
//! the add.

pub mod cart;
pub mod catalog;
pub mod error;
pub mod repository;
pub mod service;

pub use cart::{Cart, CartItem};
pub use catalog::{HttpProductCatalog, Product, ProductCatalog};
pub use error::{CartError, CatalogError, RepositoryError};
pub use repository::{CartRepository, InMemoryCartRepository};
pub use service::{CartService, CartSummary, CheckoutReceipt};
