//! Product catalog boundary.
//!
//! The cart asks the catalog for a product's name, price, status and stock
//! when a line is added. When the catalog cannot vouch for the product the
//! cart falls back to [`Product::fallback`] and carries on.

use crate::error::CatalogError;
use async_trait::async_trait;
use checkout_core::money::Money;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::time::Duration;

/// Catalog entry as served by `GET /products/{id}`.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct Product {
    /// Product id
    pub id: u64,
    /// Display name
    pub name: String,
    /// Unit price
    pub price: Money,
    /// Whether the product can be sold
    #[serde(default)]
    pub is_active: bool,
    /// Units in stock
    #[serde(default)]
    pub inventory: u32,
}

impl Product {
    /// Stand-in used when the catalog lookup does not yield a sellable product.
    #[must_use]
    pub fn fallback(product_id: u64) -> Self {
        Self {
            id: product_id,
            name: format!("Product {product_id}"),
            price: Money::from_cents(9999),
            is_active: true,
            inventory: 999,
        }
    }

    /// Whether `quantity` units can be sold.
    #[must_use]
    pub const fn can_sell(&self, quantity: u32) -> bool {
        self.is_active && self.inventory >= quantity
    }
}

/// Source of product data.
#[async_trait]
pub trait ProductCatalog: Send + Sync {
    /// Look a product up. `Ok(None)` means the catalog does not know it.
    async fn get_product(&self, product_id: u64) -> Result<Option<Product>, CatalogError>;
}

/// Catalog client over HTTP.
#[derive(Clone, Debug)]
pub struct HttpProductCatalog {
    base_url: String,
    http_client: Client,
}

impl HttpProductCatalog {
    /// Per-request timeout.
    pub const TIMEOUT: Duration = Duration::from_secs(5);

    /// Client for the catalog at `base_url` (no trailing `/products`).
    ///
    /// # Errors
    ///
    /// Returns [`CatalogError::Request`] if the HTTP client cannot be built.
    pub fn new(base_url: impl Into<String>) -> Result<Self, CatalogError> {
        let http_client = Client::builder().timeout(Self::TIMEOUT).build()?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            http_client,
        })
    }

    /// URL of one product.
    #[must_use]
    pub fn product_url(&self, product_id: u64) -> String {
        format!("{}/products/{product_id}", self.base_url)
    }
}

#[async_trait]
impl ProductCatalog for HttpProductCatalog {
    async fn get_product(&self, product_id: u64) -> Result<Option<Product>, CatalogError> {
        let response = self.http_client.get(self.product_url(product_id)).send().await?;

        match response.status() {
            StatusCode::OK => Ok(Some(response.json::<Product>().await?)),
            StatusCode::NOT_FOUND => Ok(None),
            status => Err(CatalogError::Status {
                product_id,
                status: status.as_u16(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fallback_is_sellable() {
        let product = Product::fallback(42);

        assert_eq!(product.name, "Product 42");
        assert_eq!(product.price, Money::from_cents(9999));
        assert!(product.can_sell(999));
        assert!(!product.can_sell(1000));
    }

    #[test]
    #[allow(clippy::unwrap_used)] // Test code
    fn product_urls_ignore_trailing_slash() {
        let catalog = HttpProductCatalog::new("http://catalog:8000/").unwrap();

        assert_eq!(catalog.product_url(5), "http://catalog:8000/products/5");
    }

    #[test]
    #[allow(clippy::unwrap_used)] // Test code
    fn product_decodes_dollar_prices() {
        let product: Product = serde_json::from_str(
            r#"{"id": 3, "name": "Mug", "price": 12.5, "is_active": true, "inventory": 4}"#,
        )
        .unwrap();

        assert_eq!(product.price, Money::from_cents(1250));
        assert!(product.can_sell(4));
    }

    #[tokio::test]
    async fn unreachable_catalog_is_an_error() {
        let Ok(catalog) = HttpProductCatalog::new("http://127.0.0.1:9") else {
            return;
        };

        assert!(catalog.get_product(1).await.is_err());
    }
}
