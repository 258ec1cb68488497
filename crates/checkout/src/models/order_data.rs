//! Serialized order returned to mobile clients and sent to fulfillment.

use serde::{Deserialize, Serialize};

use iap_checkout_core::ProductId;

use super::{CurrentUser, Order};

/// Order representation in the execute response (`{"order_data": ...}`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderData {
    pub number: String,
    pub status: String,
    pub currency: String,
    /// RFC 3339 timestamp.
    pub date_placed: String,
    pub total_excl_tax: String,
    pub discount: String,
    pub payment_processor: String,
    pub user: OrderUser,
    pub lines: Vec<OrderLineData>,
}

/// Purchaser as shown on an order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderUser {
    pub email: String,
    pub username: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderLineData {
    pub title: String,
    pub quantity: u32,
    pub status: String,
    pub unit_price_excl_tax: String,
    pub line_price_excl_tax: String,
    pub product: OrderProduct,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderProduct {
    pub id: ProductId,
    pub sku: String,
    pub title: String,
}

impl OrderData {
    /// Serialize an order placed by `user`.
    #[must_use]
    pub fn new(order: &Order, user: &CurrentUser) -> Self {
        Self {
            number: order.number.clone(),
            status: order.status.to_string(),
            currency: order.total.currency.to_string(),
            date_placed: order.date_placed.to_rfc3339(),
            total_excl_tax: order.total.amount_string(),
            // Line pricing and discounts belong to the commerce platform
            discount: "0.00".to_string(),
            payment_processor: order.payment_processor.to_string(),
            user: OrderUser {
                email: user.email.to_string(),
                username: user.username.clone(),
            },
            lines: order
                .lines
                .iter()
                .map(|line| OrderLineData {
                    title: line.title.clone(),
                    quantity: line.quantity,
                    status: order.status.to_string(),
                    unit_price_excl_tax: line.unit_price.amount_string(),
                    line_price_excl_tax: line.line_price().amount_string(),
                    product: OrderProduct {
                        id: line.product_id,
                        sku: line.sku.clone(),
                        title: line.title.clone(),
                    },
                })
                .collect(),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use chrono::Utc;
    use rust_decimal::Decimal;

    use iap_checkout_core::{
        BasketId, CurrencyCode, Email, OrderId, OrderStatus, PaymentProcessor, Price, SiteId,
        UserId,
    };

    use super::*;
    use crate::models::OrderLine;

    #[test]
    fn test_serializes_prices_and_processor() {
        let order = Order {
            id: OrderId::new(1),
            number: "IAP-100007".to_string(),
            basket_id: BasketId::new(7),
            owner: UserId::new(3),
            site: SiteId::new(1),
            status: OrderStatus::Complete,
            total: Price::new(Decimal::from(98), CurrencyCode::USD),
            payment_processor: PaymentProcessor::IosIap,
            lines: vec![OrderLine {
                product_id: ProductId::new(11),
                sku: "8CF08E5".to_string(),
                title: "Verified seat".to_string(),
                quantity: 2,
                unit_price: Price::new(Decimal::from(49), CurrencyCode::USD),
            }],
            date_placed: Utc::now(),
        };
        let user = CurrentUser {
            id: UserId::new(3),
            email: Email::parse("learner@example.org").unwrap(),
            username: "learner".to_string(),
        };

        let data = OrderData::new(&order, &user);
        let json = serde_json::to_value(&data).unwrap();

        assert_eq!(json["number"], "IAP-100007");
        assert_eq!(json["total_excl_tax"], "98.00");
        assert_eq!(json["payment_processor"], "ios-iap");
        assert_eq!(json["user"]["username"], "learner");
        assert_eq!(json["lines"][0]["line_price_excl_tax"], "98.00");
        assert_eq!(json["lines"][0]["product"]["id"], 11);
    }
}
