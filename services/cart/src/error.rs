//! Cart service errors.

use checkout_runtime::PublishError;
use thiserror::Error;

/// Failures of the cart store.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RepositoryError {
    /// The store could not be reached or rejected the write
    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

/// Failures of a product catalog lookup.
#[derive(Error, Debug)]
pub enum CatalogError {
    /// The request did not complete
    #[error("Catalog request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The catalog answered with an unexpected status
    #[error("Catalog returned status {status} for product {product_id}")]
    Status {
        /// Requested product
        product_id: u64,
        /// HTTP status code
        status: u16,
    },
}

/// Errors returned by cart operations.
#[derive(Error, Debug)]
pub enum CartError {
    /// Checkout of a cart without items
    #[error("Cart {0} is empty")]
    EmptyCart(String),

    /// Quantity outside the accepted range
    #[error("Invalid quantity {quantity} for product {product_id}")]
    InvalidQuantity {
        /// Product id
        product_id: u64,
        /// Requested quantity
        quantity: i64,
    },

    /// The store failed
    #[error(transparent)]
    Repository(#[from] RepositoryError),

    /// The cart event could not be published
    #[error(transparent)]
    Publish(#[from] PublishError),
}
