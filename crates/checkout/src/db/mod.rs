//! Storage collaborators for IAP checkout.
//!
//! The checkout core only talks to the traits in this module. Two backends
//! implement them:
//!
//! - [`postgres::PgStore`] - `PostgreSQL` (`iap` schema), used in production
//! - [`memory::MemoryStore`] - process-local store, used by tests
//!
//! # Invariants enforced by every backend
//!
//! - At most one `Open` basket per (owner, site)
//! - At most one order per basket; creating it flips the basket to `Submitted`
//!   in the same atomic step
//! - At most one payment per (processor, store transaction id)
//!
//! # Migrations
//!
//! Migrations are stored in `crates/checkout/migrations/` and run via:
//! ```bash
//! cargo run -p iap-checkout-cli -- migrate
//! ```

pub mod memory;
pub mod postgres;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use secrecy::ExposeSecret;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use thiserror::Error;

use iap_checkout_core::{BasketId, PaymentProcessor, ProductId, SiteId, UserId};

use crate::models::{
    Basket, BasketAttribute, BasketLine, CurrentUser, NewOrder, NewPayment, Order, PaymentRecord,
    Product,
};

pub use memory::MemoryStore;
pub use postgres::PgStore;

/// Errors that can occur during repository operations.
#[derive(Debug, Error)]
pub enum RepositoryError {
    /// Database error from sqlx.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Data in the database is corrupted or invalid.
    #[error("data corruption: {0}")]
    DataCorruption(String),

    /// Requested entity was not found.
    #[error("not found")]
    NotFound,

    /// Constraint violation (e.g., a second order for the same basket).
    #[error("constraint violation: {0}")]
    Conflict(String),
}

/// Baskets keyed by owner and site.
#[async_trait]
pub trait BasketStore: Send + Sync {
    /// Fetch a basket by id, only if `owner` owns it.
    async fn find_for_owner(
        &self,
        id: BasketId,
        owner: UserId,
    ) -> Result<Option<Basket>, RepositoryError>;

    /// Return the owner's `Open` basket on `site`, creating one if needed.
    async fn open_basket(&self, owner: UserId, site: SiteId) -> Result<Basket, RepositoryError>;

    /// Replace every line of an `Open` basket.
    async fn replace_lines(
        &self,
        id: BasketId,
        lines: Vec<BasketLine>,
    ) -> Result<Basket, RepositoryError>;

    /// Record an attribute, overwriting a previous value for the same key.
    async fn set_attribute(
        &self,
        id: BasketId,
        key: &str,
        value: &str,
    ) -> Result<(), RepositoryError>;

    /// All attributes attached to a basket.
    async fn attributes(&self, id: BasketId) -> Result<Vec<BasketAttribute>, RepositoryError>;

    /// Move an `Open` basket to `Frozen`. Already-frozen baskets are returned
    /// unchanged; submitted ones yield [`RepositoryError::Conflict`].
    async fn freeze(&self, id: BasketId) -> Result<Basket, RepositoryError>;
}

/// Orders, one per basket.
#[async_trait]
pub trait OrderStore: Send + Sync {
    /// Persist an order and mark its basket `Submitted` atomically.
    ///
    /// Returns [`RepositoryError::Conflict`] when the basket already has an order.
    async fn create_for_basket(&self, order: NewOrder) -> Result<Order, RepositoryError>;

    /// The non-cancelled order placed for a basket, if any.
    async fn find_for_basket(&self, basket: BasketId) -> Result<Option<Order>, RepositoryError>;

    /// Whether the user already owns the product through a non-cancelled order.
    async fn user_has_purchased(
        &self,
        user: UserId,
        product: ProductId,
    ) -> Result<bool, RepositoryError>;
}

/// Payments accepted from stores.
#[async_trait]
pub trait PaymentStore: Send + Sync {
    /// Record a payment. Returns [`RepositoryError::Conflict`] when the store
    /// transaction was already recorded for this processor.
    async fn record(&self, payment: NewPayment) -> Result<PaymentRecord, RepositoryError>;

    /// Look up a recorded payment by store transaction.
    async fn find_by_transaction(
        &self,
        processor: PaymentProcessor,
        transaction_id: &str,
    ) -> Result<Option<PaymentRecord>, RepositoryError>;
}

/// Products looked up by SKU.
#[async_trait]
pub trait ProductCatalog: Send + Sync {
    /// Every product whose SKU is in `skus`. Unknown SKUs are skipped.
    async fn find_by_skus(&self, skus: &[String]) -> Result<Vec<Product>, RepositoryError>;
}

/// Resolves bearer tokens issued by the platform to users.
#[async_trait]
pub trait UserDirectory: Send + Sync {
    /// Resolve the SHA-256 hex digest of a bearer token.
    async fn find_by_token_digest(
        &self,
        digest: &str,
    ) -> Result<Option<CurrentUser>, RepositoryError>;
}

/// Bundle of store handles shared by services and handlers.
#[derive(Clone)]
pub struct Storage {
    pub baskets: Arc<dyn BasketStore>,
    pub orders: Arc<dyn OrderStore>,
    pub payments: Arc<dyn PaymentStore>,
    pub catalog: Arc<dyn ProductCatalog>,
    pub users: Arc<dyn UserDirectory>,
}

impl Storage {
    /// Every store backed by the same `PostgreSQL` pool.
    #[must_use]
    pub fn postgres(pool: PgPool) -> Self {
        Self::from_backend(Arc::new(PgStore::new(pool)))
    }

    /// Every store backed by one shared in-memory store.
    #[must_use]
    pub fn memory(store: Arc<MemoryStore>) -> Self {
        Self::from_backend(store)
    }

    fn from_backend<B>(backend: Arc<B>) -> Self
    where
        B: BasketStore + OrderStore + PaymentStore + ProductCatalog + UserDirectory + 'static,
    {
        Self {
            baskets: backend.clone(),
            orders: backend.clone(),
            payments: backend.clone(),
            catalog: backend.clone(),
            users: backend,
        }
    }
}

/// Create a `PostgreSQL` connection pool with sensible defaults.
///
/// # Errors
///
/// Returns `sqlx::Error` if the connection cannot be established.
pub async fn create_pool(database_url: &secrecy::SecretString) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(10)
        .min_connections(2)
        .acquire_timeout(Duration::from_secs(10))
        .connect(database_url.expose_secret())
        .await
}
