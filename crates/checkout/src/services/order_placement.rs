//! Order placement for a paid basket.

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tracing::instrument;

use iap_checkout_core::{BasketId, PaymentProcessor};

use crate::db::{OrderStore, RepositoryError};
use crate::models::{Basket, MixedCurrency, NewOrder, Order};

/// Offset added to basket ids when numbering orders.
const ORDER_NUMBER_OFFSET: i64 = 100_000;

/// Why an order could not be placed.
#[derive(Debug, Error)]
pub enum OrderPlacementError {
    #[error("basket {0} already has an order")]
    AlreadyPlaced(BasketId),

    #[error("basket {0} has no lines")]
    EmptyBasket(BasketId),

    #[error(transparent)]
    MixedCurrency(#[from] MixedCurrency),

    #[error("repository error: {0}")]
    Repository(#[from] RepositoryError),
}

/// Creates the single order for a basket.
#[async_trait]
pub trait OrderPlacer: Send + Sync {
    async fn place_order(
        &self,
        basket: &Basket,
        processor: PaymentProcessor,
    ) -> Result<Order, OrderPlacementError>;
}

/// Order number for a basket: `{prefix}-{100000 + basket id}`.
#[must_use]
pub fn order_number(prefix: &str, basket: BasketId) -> String {
    format!(
        "{prefix}-{}",
        ORDER_NUMBER_OFFSET.saturating_add(basket.as_i64())
    )
}

/// Places orders through an [`OrderStore`].
pub struct StoreOrderPlacer {
    orders: Arc<dyn OrderStore>,
    number_prefix: String,
}

impl StoreOrderPlacer {
    #[must_use]
    pub fn new(orders: Arc<dyn OrderStore>, number_prefix: impl Into<String>) -> Self {
        Self {
            orders,
            number_prefix: number_prefix.into(),
        }
    }
}

#[async_trait]
impl OrderPlacer for StoreOrderPlacer {
    #[instrument(skip_all, fields(basket_id = %basket.id))]
    async fn place_order(
        &self,
        basket: &Basket,
        processor: PaymentProcessor,
    ) -> Result<Order, OrderPlacementError> {
        if basket.is_empty() {
            return Err(OrderPlacementError::EmptyBasket(basket.id));
        }

        let number = order_number(&self.number_prefix, basket.id);
        let draft = NewOrder::from_basket(basket, number, processor)?;
        self.orders
            .create_for_basket(draft)
            .await
            .map_err(|e| match e {
                RepositoryError::Conflict(_) => OrderPlacementError::AlreadyPlaced(basket.id),
                other => OrderPlacementError::Repository(other),
            })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use rust_decimal::Decimal;

    use iap_checkout_core::{BasketStatus, CurrencyCode, Price, ProductId, SiteId, UserId};

    use super::*;
    use crate::db::MemoryStore;
    use crate::models::BasketLine;

    fn line() -> BasketLine {
        BasketLine {
            product_id: ProductId::new(5),
            sku: "SKU5".to_string(),
            title: "Verified seat".to_string(),
            quantity: 1,
            unit_price: Price::new(Decimal::from(49), CurrencyCode::USD),
        }
    }

    #[test]
    fn test_order_number() {
        assert_eq!(order_number("IAP", BasketId::new(42)), "IAP-100042");
        assert_eq!(order_number("EDX", BasketId::new(1)), "EDX-100001");
    }

    #[tokio::test]
    async fn test_places_once_and_submits_basket() {
        let store = Arc::new(MemoryStore::new());
        let basket = store.insert_basket(UserId::new(1), SiteId::new(1), BasketStatus::Frozen, vec![line()]);
        let placer = StoreOrderPlacer::new(store.clone(), "IAP");

        let order = placer
            .place_order(&basket, PaymentProcessor::AndroidIap)
            .await
            .unwrap();
        assert_eq!(order.number, format!("IAP-{}", 100_000 + basket.id.as_i64()));
        assert_eq!(order.lines.len(), 1);
        assert_eq!(
            store.basket(basket.id).unwrap().status,
            BasketStatus::Submitted
        );

        let err = placer
            .place_order(&basket, PaymentProcessor::AndroidIap)
            .await
            .unwrap_err();
        assert!(matches!(err, OrderPlacementError::AlreadyPlaced(_)));
        assert_eq!(store.orders_for_basket(basket.id).len(), 1);
    }

    #[tokio::test]
    async fn test_empty_basket_is_refused() {
        let store = Arc::new(MemoryStore::new());
        let basket = store.insert_basket(UserId::new(1), SiteId::new(1), BasketStatus::Frozen, vec![]);
        let placer = StoreOrderPlacer::new(store.clone(), "IAP");

        let err = placer
            .place_order(&basket, PaymentProcessor::IosIap)
            .await
            .unwrap_err();
        assert!(matches!(err, OrderPlacementError::EmptyBasket(_)));
        assert!(store.orders_for_basket(basket.id).is_empty());
    }
}
