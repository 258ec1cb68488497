//! Order records created by order placement.

use chrono::{DateTime, Utc};
use serde::Serialize;

use iap_checkout_core::{
    BasketId, OrderId, OrderStatus, PaymentProcessor, Price, ProductId, SiteId, UserId,
};

use super::{Basket, MixedCurrency};

/// A placed order. Exactly one exists per submitted basket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Order {
    pub id: OrderId,
    pub number: String,
    pub basket_id: BasketId,
    pub owner: UserId,
    pub site: SiteId,
    pub status: OrderStatus,
    pub total: Price,
    pub payment_processor: PaymentProcessor,
    pub lines: Vec<OrderLine>,
    pub date_placed: DateTime<Utc>,
}

/// A purchased product line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OrderLine {
    pub product_id: ProductId,
    pub sku: String,
    pub title: String,
    pub quantity: u32,
    pub unit_price: Price,
}

impl OrderLine {
    /// Unit price times quantity.
    #[must_use]
    pub fn line_price(&self) -> Price {
        self.unit_price.times(self.quantity)
    }
}

/// Everything a store needs to persist an order for a basket.
#[derive(Debug, Clone)]
pub struct NewOrder {
    pub number: String,
    pub basket_id: BasketId,
    pub owner: UserId,
    pub site: SiteId,
    pub total: Price,
    pub payment_processor: PaymentProcessor,
    pub lines: Vec<OrderLine>,
}

impl NewOrder {
    /// Snapshot a basket's lines into an order draft.
    ///
    /// # Errors
    ///
    /// Returns [`MixedCurrency`] when the basket has no single total.
    pub fn from_basket(
        basket: &Basket,
        number: String,
        processor: PaymentProcessor,
    ) -> Result<Self, MixedCurrency> {
        Ok(Self {
            number,
            basket_id: basket.id,
            owner: basket.owner,
            site: basket.site,
            total: basket.total()?,
            payment_processor: processor,
            lines: basket
                .lines
                .iter()
                .map(|line| OrderLine {
                    product_id: line.product_id,
                    sku: line.sku.clone(),
                    title: line.title.clone(),
                    quantity: line.quantity,
                    unit_price: line.unit_price,
                })
                .collect(),
        })
    }
}
