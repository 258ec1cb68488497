//! Process-local store.
//!
//! All collections live behind one mutex so that "create order + submit
//! basket" is as atomic as the `PostgreSQL` transaction it stands in for.
//! Intended for tests and local experiments.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;

use iap_checkout_core::{
    BasketId, BasketStatus, OrderId, OrderStatus, PaymentId, PaymentProcessor, ProductId, SiteId,
    UserId,
};

use super::{
    BasketStore, OrderStore, PaymentStore, ProductCatalog, RepositoryError, UserDirectory,
};
use crate::middleware::auth::token_digest;
use crate::models::{
    Basket, BasketAttribute, BasketLine, CurrentUser, NewOrder, NewPayment, Order, PaymentRecord,
    Product,
};

#[derive(Default)]
struct State {
    next_id: i64,
    baskets: HashMap<BasketId, Basket>,
    attributes: HashMap<BasketId, Vec<BasketAttribute>>,
    orders: HashMap<OrderId, Order>,
    payments: Vec<PaymentRecord>,
    products: Vec<Product>,
    tokens: HashMap<String, CurrentUser>,
}

impl State {
    fn next_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }
}

/// In-memory implementation of every storage trait.
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

impl MemoryStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a user reachable through `token`.
    pub fn add_user(&self, user: CurrentUser, token: &str) {
        self.state.lock().tokens.insert(token_digest(token), user);
    }

    /// Add a catalog product, assigning it a fresh id.
    pub fn add_product(&self, mut product: Product) -> Product {
        let mut state = self.state.lock();
        product.id = ProductId::new(state.next_id());
        state.products.push(product.clone());
        product
    }

    /// Insert a basket directly, bypassing the one-open-basket rule.
    pub fn insert_basket(
        &self,
        owner: UserId,
        site: SiteId,
        status: BasketStatus,
        lines: Vec<BasketLine>,
    ) -> Basket {
        let mut state = self.state.lock();
        let basket = Basket {
            id: BasketId::new(state.next_id()),
            owner,
            site,
            status,
            lines,
            created_at: Utc::now(),
        };
        state.baskets.insert(basket.id, basket.clone());
        basket
    }

    /// Current snapshot of a basket regardless of owner.
    #[must_use]
    pub fn basket(&self, id: BasketId) -> Option<Basket> {
        self.state.lock().baskets.get(&id).cloned()
    }

    /// Every order placed for a basket, cancelled or not.
    #[must_use]
    pub fn orders_for_basket(&self, id: BasketId) -> Vec<Order> {
        self.state
            .lock()
            .orders
            .values()
            .filter(|order| order.basket_id == id)
            .cloned()
            .collect()
    }

    /// Number of recorded payments.
    #[must_use]
    pub fn payment_count(&self) -> usize {
        self.state.lock().payments.len()
    }
}

#[async_trait]
impl BasketStore for MemoryStore {
    async fn find_for_owner(
        &self,
        id: BasketId,
        owner: UserId,
    ) -> Result<Option<Basket>, RepositoryError> {
        Ok(self
            .state
            .lock()
            .baskets
            .get(&id)
            .filter(|basket| basket.owner == owner)
            .cloned())
    }

    async fn open_basket(&self, owner: UserId, site: SiteId) -> Result<Basket, RepositoryError> {
        let mut state = self.state.lock();
        if let Some(basket) = state.baskets.values().find(|basket| {
            basket.owner == owner && basket.site == site && basket.status == BasketStatus::Open
        }) {
            return Ok(basket.clone());
        }

        let basket = Basket {
            id: BasketId::new(state.next_id()),
            owner,
            site,
            status: BasketStatus::Open,
            lines: Vec::new(),
            created_at: Utc::now(),
        };
        state.baskets.insert(basket.id, basket.clone());
        Ok(basket)
    }

    async fn replace_lines(
        &self,
        id: BasketId,
        lines: Vec<BasketLine>,
    ) -> Result<Basket, RepositoryError> {
        let mut state = self.state.lock();
        let basket = state.baskets.get_mut(&id).ok_or(RepositoryError::NotFound)?;
        if basket.status != BasketStatus::Open {
            return Err(RepositoryError::Conflict(format!(
                "basket {id} is {} and cannot change lines",
                basket.status
            )));
        }
        basket.lines = lines;
        Ok(basket.clone())
    }

    async fn set_attribute(
        &self,
        id: BasketId,
        key: &str,
        value: &str,
    ) -> Result<(), RepositoryError> {
        let mut state = self.state.lock();
        if !state.baskets.contains_key(&id) {
            return Err(RepositoryError::NotFound);
        }
        let attributes = state.attributes.entry(id).or_default();
        match attributes.iter_mut().find(|attribute| attribute.key == key) {
            Some(existing) => value.clone_into(&mut existing.value),
            None => attributes.push(BasketAttribute {
                key: key.to_owned(),
                value: value.to_owned(),
            }),
        }
        Ok(())
    }

    async fn attributes(&self, id: BasketId) -> Result<Vec<BasketAttribute>, RepositoryError> {
        Ok(self
            .state
            .lock()
            .attributes
            .get(&id)
            .cloned()
            .unwrap_or_default())
    }

    async fn freeze(&self, id: BasketId) -> Result<Basket, RepositoryError> {
        let mut state = self.state.lock();
        let basket = state.baskets.get_mut(&id).ok_or(RepositoryError::NotFound)?;
        if !basket.status.can_freeze() {
            return Err(RepositoryError::Conflict(format!(
                "basket {id} is already submitted"
            )));
        }
        basket.status = BasketStatus::Frozen;
        Ok(basket.clone())
    }
}

#[async_trait]
impl OrderStore for MemoryStore {
    async fn create_for_basket(&self, order: NewOrder) -> Result<Order, RepositoryError> {
        let mut state = self.state.lock();
        if state
            .orders
            .values()
            .any(|existing| existing.basket_id == order.basket_id)
        {
            return Err(RepositoryError::Conflict(format!(
                "basket {} already has an order",
                order.basket_id
            )));
        }

        let basket = state
            .baskets
            .get_mut(&order.basket_id)
            .ok_or(RepositoryError::NotFound)?;
        basket.status = BasketStatus::Submitted;

        let placed = Order {
            id: OrderId::new(state.next_id()),
            number: order.number,
            basket_id: order.basket_id,
            owner: order.owner,
            site: order.site,
            status: OrderStatus::Complete,
            total: order.total,
            payment_processor: order.payment_processor,
            lines: order.lines,
            date_placed: Utc::now(),
        };
        state.orders.insert(placed.id, placed.clone());
        Ok(placed)
    }

    async fn find_for_basket(&self, basket: BasketId) -> Result<Option<Order>, RepositoryError> {
        Ok(self
            .state
            .lock()
            .orders
            .values()
            .find(|order| order.basket_id == basket && order.status != OrderStatus::Cancelled)
            .cloned())
    }

    async fn user_has_purchased(
        &self,
        user: UserId,
        product: ProductId,
    ) -> Result<bool, RepositoryError> {
        Ok(self.state.lock().orders.values().any(|order| {
            order.owner == user
                && order.status != OrderStatus::Cancelled
                && order.lines.iter().any(|line| line.product_id == product)
        }))
    }
}

#[async_trait]
impl PaymentStore for MemoryStore {
    async fn record(&self, payment: NewPayment) -> Result<PaymentRecord, RepositoryError> {
        let mut state = self.state.lock();
        if state.payments.iter().any(|existing| {
            existing.processor == payment.processor
                && existing.transaction_id == payment.transaction_id
        }) {
            return Err(RepositoryError::Conflict(format!(
                "transaction {} already recorded",
                payment.transaction_id
            )));
        }

        let record = PaymentRecord {
            id: PaymentId::new(state.next_id()),
            basket_id: payment.basket_id,
            processor: payment.processor,
            transaction_id: payment.transaction_id,
            amount: payment.amount,
            raw_response: payment.raw_response,
            created_at: Utc::now(),
        };
        state.payments.push(record.clone());
        Ok(record)
    }

    async fn find_by_transaction(
        &self,
        processor: PaymentProcessor,
        transaction_id: &str,
    ) -> Result<Option<PaymentRecord>, RepositoryError> {
        Ok(self
            .state
            .lock()
            .payments
            .iter()
            .find(|record| record.processor == processor && record.transaction_id == transaction_id)
            .cloned())
    }
}

#[async_trait]
impl ProductCatalog for MemoryStore {
    async fn find_by_skus(&self, skus: &[String]) -> Result<Vec<Product>, RepositoryError> {
        Ok(self
            .state
            .lock()
            .products
            .iter()
            .filter(|product| skus.contains(&product.sku))
            .cloned()
            .collect())
    }
}

#[async_trait]
impl UserDirectory for MemoryStore {
    async fn find_by_token_digest(
        &self,
        digest: &str,
    ) -> Result<Option<CurrentUser>, RepositoryError> {
        Ok(self.state.lock().tokens.get(digest).cloned())
    }
}
