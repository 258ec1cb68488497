//! Add-to-basket for mobile clients.

use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tracing::instrument;

use iap_checkout_core::{BasketId, SiteId};

use crate::db::{BasketStore, OrderStore, ProductCatalog, RepositoryError};
use crate::error::IapError;
use crate::models::{BasketLine, CurrentUser, EMAIL_OPT_IN_ATTRIBUTE, Product};

use super::observer::{BASKET_ADD_EVENT, CheckoutEvent, CheckoutObserver};

/// Message returned with a successful add.
pub const BASKET_ADD_MESSAGE: &str = "Course added to the basket successfully";

/// Body returned by `GET /basket/add/`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BasketSummary {
    pub basket_id: BasketId,
    pub currency: String,
    pub total: String,
    pub message: String,
    pub lines: Vec<BasketLine>,
}

/// Puts purchasable products into the user's open basket.
#[derive(Clone)]
pub struct AddToBasket {
    catalog: Arc<dyn ProductCatalog>,
    orders: Arc<dyn OrderStore>,
    baskets: Arc<dyn BasketStore>,
    site: SiteId,
    observer: Arc<dyn CheckoutObserver>,
}

impl AddToBasket {
    #[must_use]
    pub fn new(
        catalog: Arc<dyn ProductCatalog>,
        orders: Arc<dyn OrderStore>,
        baskets: Arc<dyn BasketStore>,
        site: SiteId,
        observer: Arc<dyn CheckoutObserver>,
    ) -> Self {
        Self {
            catalog,
            orders,
            baskets,
            site,
            observer,
        }
    }

    /// Replace the open basket's contents with the requested products.
    ///
    /// Products the user already owns and products not currently for sale
    /// are left out.
    ///
    /// # Errors
    ///
    /// - `NoSkusProvided` for an empty request
    /// - `ProductsDoNotExist` when none of the SKUs is in the catalog
    /// - `AlreadyPurchased` when the user owns every requested product
    /// - `NoProductAvailable` when nothing left is for sale
    #[instrument(skip(self, user), fields(user_id = %user.id))]
    pub async fn add(
        &self,
        user: &CurrentUser,
        skus: Vec<String>,
        email_opt_in: bool,
    ) -> Result<BasketSummary, IapError> {
        self.observer.record(CheckoutEvent::Analytics {
            name: BASKET_ADD_EVENT,
            user: user.id,
        });

        let skus: Vec<String> = skus
            .into_iter()
            .map(|sku| sku.trim().to_string())
            .filter(|sku| !sku.is_empty())
            .collect();
        if skus.is_empty() {
            return Err(IapError::NoSkusProvided);
        }

        let products = self.catalog.find_by_skus(&skus).await?;
        if products.is_empty() {
            return Err(IapError::ProductsDoNotExist {
                skus: skus.join(", "),
            });
        }

        let available = self.available_products(user, products).await?;

        let basket = self.baskets.open_basket(user.id, self.site).await?;
        let lines = available
            .into_iter()
            .map(|product| BasketLine {
                product_id: product.id,
                sku: product.sku,
                title: product.title,
                quantity: 1,
                unit_price: product.price,
            })
            .collect();
        let basket = self.baskets.replace_lines(basket.id, lines).await?;
        self.baskets
            .set_attribute(
                basket.id,
                EMAIL_OPT_IN_ATTRIBUTE,
                if email_opt_in { "True" } else { "False" },
            )
            .await?;

        let total = basket
            .total()
            .map_err(|e| RepositoryError::DataCorruption(e.to_string()))?;
        Ok(BasketSummary {
            basket_id: basket.id,
            currency: total.currency.to_string(),
            total: total.amount_string(),
            message: BASKET_ADD_MESSAGE.to_string(),
            lines: basket.lines,
        })
    }

    /// Drop purchased products, then products not for sale.
    async fn available_products(
        &self,
        user: &CurrentUser,
        products: Vec<Product>,
    ) -> Result<Vec<Product>, IapError> {
        let mut unpurchased = Vec::with_capacity(products.len());
        for product in products {
            if !self.orders.user_has_purchased(user.id, product.id).await? {
                unpurchased.push(product);
            }
        }
        if unpurchased.is_empty() {
            return Err(IapError::AlreadyPurchased);
        }

        let now = Utc::now();
        let available: Vec<Product> = unpurchased
            .into_iter()
            .filter(|product| {
                let for_sale = product.is_available_at(now);
                if !for_sale {
                    self.observer.record(CheckoutEvent::ProductUnavailable {
                        sku: product.sku.clone(),
                    });
                }
                for_sale
            })
            .collect();
        // One basket, one currency: products priced otherwise cannot join it
        let Some(currency) = available.first().map(|product| product.price.currency) else {
            return Err(IapError::NoProductAvailable);
        };
        Ok(available
            .into_iter()
            .filter(|product| {
                let same = product.price.currency == currency;
                if !same {
                    self.observer.record(CheckoutEvent::ProductUnavailable {
                        sku: product.sku.clone(),
                    });
                }
                same
            })
            .collect())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use chrono::Duration;
    use rust_decimal::Decimal;
    use tracing::Level;

    use iap_checkout_core::{
        BasketStatus, CurrencyCode, Email, PaymentProcessor, Price, ProductId, UserId,
    };

    use super::*;
    use crate::db::MemoryStore;
    use crate::models::NewOrder;
    use crate::services::observer::RecordingObserver;

    fn user() -> CurrentUser {
        CurrentUser {
            id: UserId::new(7),
            email: Email::parse("learner@example.org").unwrap(),
            username: "learner".to_string(),
        }
    }

    fn listed(sku: &str, price: i64) -> Product {
        Product {
            id: ProductId::new(0),
            sku: sku.to_string(),
            title: format!("Seat {sku}"),
            price: Price::new(Decimal::from(price), CurrencyCode::USD),
            is_active: true,
            expires: None,
        }
    }

    fn product(store: &MemoryStore, sku: &str, price: i64) -> Product {
        store.add_product(listed(sku, price))
    }

    fn service(store: &Arc<MemoryStore>, observer: &RecordingObserver) -> AddToBasket {
        AddToBasket::new(
            store.clone(),
            store.clone(),
            store.clone(),
            SiteId::new(1),
            Arc::new(observer.clone()),
        )
    }

    fn skus(values: &[&str]) -> Vec<String> {
        values.iter().map(ToString::to_string).collect()
    }

    async fn purchase(store: &Arc<MemoryStore>, product: &Product) {
        let basket = store.insert_basket(
            user().id,
            SiteId::new(1),
            BasketStatus::Frozen,
            vec![BasketLine {
                product_id: product.id,
                sku: product.sku.clone(),
                title: product.title.clone(),
                quantity: 1,
                unit_price: product.price,
            }],
        );
        store
            .create_for_basket(
                NewOrder::from_basket(&basket, "IAP-1".to_string(), PaymentProcessor::IosIap).unwrap(),
            )
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_adds_every_available_product() {
        let store = Arc::new(MemoryStore::new());
        let observer = RecordingObserver::new();
        product(&store, "A1", 10);
        product(&store, "B2", 15);

        let summary = service(&store, &observer)
            .add(&user(), skus(&["A1", "B2"]), true)
            .await
            .unwrap();

        assert_eq!(summary.lines.len(), 2);
        assert_eq!(summary.total, "25.00");
        assert_eq!(summary.message, BASKET_ADD_MESSAGE);
        let attributes = store.attributes(summary.basket_id).await.unwrap();
        assert_eq!(attributes[0].key, EMAIL_OPT_IN_ATTRIBUTE);
        assert_eq!(attributes[0].value, "True");
        assert!(observer.logged(Level::INFO, BASKET_ADD_EVENT));
    }

    #[tokio::test]
    async fn test_excludes_purchased_and_unavailable() {
        let store = Arc::new(MemoryStore::new());
        let observer = RecordingObserver::new();
        let owned = product(&store, "OWNED", 10);
        store.add_product(Product {
            expires: Some(Utc::now() - Duration::days(1)),
            ..listed("OLD", 10)
        });
        product(&store, "NEW", 20);
        purchase(&store, &owned).await;

        let summary = service(&store, &observer)
            .add(&user(), skus(&["OWNED", "OLD", "NEW"]), false)
            .await
            .unwrap();

        let added: Vec<_> = summary.lines.iter().map(|line| line.sku.as_str()).collect();
        assert_eq!(added, vec!["NEW"]);
        assert!(observer.logged(Level::INFO, "Product [OLD] is not available to buy."));
    }

    #[tokio::test]
    async fn test_all_purchased_is_refused() {
        let store = Arc::new(MemoryStore::new());
        let observer = RecordingObserver::new();
        let owned = product(&store, "OWNED", 10);
        purchase(&store, &owned).await;

        let err = service(&store, &observer)
            .add(&user(), skus(&["OWNED"]), false)
            .await
            .unwrap_err();

        assert!(matches!(err, IapError::AlreadyPurchased));
    }

    #[tokio::test]
    async fn test_input_errors() {
        let store = Arc::new(MemoryStore::new());
        let observer = RecordingObserver::new();
        let service = service(&store, &observer);

        let err = service.add(&user(), Vec::new(), false).await.unwrap_err();
        assert!(matches!(err, IapError::NoSkusProvided));

        let err = service
            .add(&user(), skus(&["X1", "X2"]), false)
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "Products with SKU(s) [X1, X2] do not exist.");

        store.add_product(Product {
            is_active: false,
            ..listed("OFF", 10)
        });
        let err = service
            .add(&user(), skus(&["OFF"]), false)
            .await
            .unwrap_err();
        assert!(matches!(err, IapError::NoProductAvailable));
    }

    #[tokio::test]
    async fn test_products_in_another_currency_are_left_out() {
        let store = Arc::new(MemoryStore::new());
        let observer = RecordingObserver::new();
        product(&store, "A1", 10);
        store.add_product(Product {
            price: Price::new(Decimal::from(9), CurrencyCode::EUR),
            ..listed("E1", 9)
        });

        let summary = service(&store, &observer)
            .add(&user(), skus(&["A1", "E1"]), false)
            .await
            .unwrap();

        assert_eq!(summary.currency, "USD");
        assert_eq!(summary.total, "10.00");
        assert_eq!(summary.lines.len(), 1);
        assert_eq!(summary.lines[0].sku, "A1");
        assert!(observer.logged(Level::INFO, "Product [E1] is not available to buy."));
    }
}
