//! Side effects run after an order is placed.
//!
//! Hooks run once the order is durable. A failing hook never undoes the
//! purchase; the coordinator reports it to the client as a degraded success.

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, instrument};
use url::Url;

use crate::models::{CurrentUser, Order, OrderData};

use super::observer::{CheckoutEvent, CheckoutObserver, ORDER_COMPLETED_EVENT};

/// Errors from post-order hooks.
#[derive(Debug, Error)]
pub enum HookError {
    /// HTTP request failed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The receiving endpoint answered with a non-success status.
    #[error("endpoint answered {status}")]
    Status { status: u16 },

    #[error("{0}")]
    Failed(String),
}

/// A side effect of a placed order.
#[async_trait]
pub trait PostOrderHook: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    async fn run(&self, order: &Order, user: &CurrentUser) -> Result<(), HookError>;
}

/// Posts the serialized order to the fulfillment service.
pub struct FulfillmentWebhookHook {
    client: reqwest::Client,
    url: Url,
}

impl FulfillmentWebhookHook {
    #[must_use]
    pub const fn new(client: reqwest::Client, url: Url) -> Self {
        Self { client, url }
    }
}

#[async_trait]
impl PostOrderHook for FulfillmentWebhookHook {
    fn name(&self) -> &'static str {
        "fulfillment_webhook"
    }

    #[instrument(skip_all, fields(order = %order.number))]
    async fn run(&self, order: &Order, user: &CurrentUser) -> Result<(), HookError> {
        let body = serde_json::json!({
            "event": "order_placed",
            "order": OrderData::new(order, user),
        });

        let response = self.client.post(self.url.clone()).json(&body).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(HookError::Status {
                status: status.as_u16(),
            });
        }

        debug!("Fulfillment notified");
        Ok(())
    }
}

/// Records the completed order as an analytics event.
pub struct AnalyticsHook {
    observer: Arc<dyn CheckoutObserver>,
}

impl AnalyticsHook {
    #[must_use]
    pub fn new(observer: Arc<dyn CheckoutObserver>) -> Self {
        Self { observer }
    }
}

#[async_trait]
impl PostOrderHook for AnalyticsHook {
    fn name(&self) -> &'static str {
        "analytics"
    }

    async fn run(&self, order: &Order, _user: &CurrentUser) -> Result<(), HookError> {
        self.observer.record(CheckoutEvent::Analytics {
            name: ORDER_COMPLETED_EVENT,
            user: order.owner,
        });
        Ok(())
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
    use crate::services::observer::RecordingObserver;

    #[tokio::test]
    async fn test_analytics_hook_records_order_completed() {
        let observer = RecordingObserver::new();
        let hook = AnalyticsHook::new(Arc::new(observer.clone()));
        let order = Order {
            id: OrderId::new(1),
            number: "IAP-100001".to_string(),
            basket_id: BasketId::new(1),
            owner: UserId::new(4),
            site: SiteId::new(1),
            status: OrderStatus::Complete,
            total: Price::new(Decimal::from(10), CurrencyCode::USD),
            payment_processor: PaymentProcessor::AndroidIap,
            lines: Vec::new(),
            date_placed: Utc::now(),
        };
        let user = CurrentUser {
            id: UserId::new(4),
            email: Email::parse("a@example.org").unwrap(),
            username: "a".to_string(),
        };

        hook.run(&order, &user).await.unwrap();

        assert_eq!(
            observer.events(),
            vec![CheckoutEvent::Analytics {
                name: ORDER_COMPLETED_EVENT,
                user: UserId::new(4),
            }]
        );
    }
}
