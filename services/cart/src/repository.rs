//! Cart persistence boundary.

use crate::cart::Cart;
use crate::error::RepositoryError;
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;

/// Durable store for carts.
#[async_trait]
pub trait CartRepository: Send + Sync {
    /// Cart by id.
    async fn get(&self, cart_id: &str) -> Result<Option<Cart>, RepositoryError>;

    /// Insert or replace a cart.
    async fn save(&self, cart: &Cart) -> Result<(), RepositoryError>;
}

/// In-process store.
#[derive(Debug, Default)]
pub struct InMemoryCartRepository {
    carts: RwLock<HashMap<String, Cart>>,
}

impl InMemoryCartRepository {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CartRepository for InMemoryCartRepository {
    async fn get(&self, cart_id: &str) -> Result<Option<Cart>, RepositoryError> {
        Ok(self.carts.read().await.get(cart_id).cloned())
    }

    async fn save(&self, cart: &Cart) -> Result<(), RepositoryError> {
        self.carts.write().await.insert(cart.id.clone(), cart.clone());
        Ok(())
    }
}
