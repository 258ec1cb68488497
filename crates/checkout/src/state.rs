//! Application state shared across handlers.

use std::sync::Arc;

use sqlx::PgPool;

use crate::config::{CheckoutSettings, ServiceConfig};
use crate::db::Storage;
use crate::services::{
    AddToBasket, AnalyticsHook, BasketResolver, CheckoutInitiator, CheckoutObserver,
    DuplicateGuard, FulfillmentWebhookHook, PostOrderHook, PurchaseCoordinator, StoreOrderPlacer,
    StorePaymentRecorder, TracingObserver,
};
use crate::validators::{ProcessorRegistry, RegistryError};

/// Error assembling the application state.
#[derive(Debug, thiserror::Error)]
pub enum StateError {
    #[error("payment processors: {0}")]
    Registry(#[from] RegistryError),
    #[error("HTTP client: {0}")]
    Http(#[from] reqwest::Error),
}

/// Application state shared across all handlers.
///
/// This struct is cheaply cloneable via `Arc`; every service it hands out
/// shares the same stores, registry and observer.
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    storage: Storage,
    add_to_basket: AddToBasket,
    checkout: CheckoutInitiator,
    coordinator: PurchaseCoordinator,
}

impl AppState {
    /// Wire the checkout services over `storage`.
    ///
    /// Hooks run after every placed order, in the given order.
    #[must_use]
    pub fn new(
        settings: CheckoutSettings,
        storage: Storage,
        registry: ProcessorRegistry,
        hooks: Vec<Arc<dyn PostOrderHook>>,
        observer: Arc<dyn CheckoutObserver>,
    ) -> Self {
        let resolver = BasketResolver::new(storage.baskets.clone(), observer.clone());
        let orders = StoreOrderPlacer::new(
            storage.orders.clone(),
            settings.order_number_prefix.clone(),
        );

        let add_to_basket = AddToBasket::new(
            storage.catalog.clone(),
            storage.orders.clone(),
            storage.baskets.clone(),
            settings.site_id,
            observer.clone(),
        );
        let checkout = CheckoutInitiator::new(
            resolver.clone(),
            storage.baskets.clone(),
            registry.clone(),
            settings,
            observer.clone(),
        );
        let payments = StorePaymentRecorder::new(
            registry.clone(),
            DuplicateGuard::new(storage.orders.clone(), storage.payments.clone()),
            storage.payments.clone(),
        );
        let coordinator = PurchaseCoordinator::new(
            resolver,
            registry,
            Arc::new(payments),
            Arc::new(orders),
            hooks,
            observer,
        );

        Self {
            inner: Arc::new(AppStateInner {
                storage,
                add_to_basket,
                checkout,
                coordinator,
            }),
        }
    }

    /// Production wiring: `PostgreSQL` stores, store validators, tracing.
    ///
    /// # Errors
    ///
    /// Returns `StateError` if an enabled processor is not configured or an
    /// HTTP client cannot be built.
    pub fn from_config(config: &ServiceConfig, pool: PgPool) -> Result<Self, StateError> {
        let registry = ProcessorRegistry::from_config(config)?;
        let observer: Arc<dyn CheckoutObserver> = Arc::new(TracingObserver);

        let mut hooks: Vec<Arc<dyn PostOrderHook>> = Vec::new();
        if let Some(url) = &config.fulfillment_webhook_url {
            let client = reqwest::Client::builder()
                .timeout(config.store_timeout)
                .build()?;
            hooks.push(Arc::new(FulfillmentWebhookHook::new(client, url.clone())));
        }
        hooks.push(Arc::new(AnalyticsHook::new(observer.clone())));

        Ok(Self::new(
            config.checkout.clone(),
            Storage::postgres(pool),
            registry,
            hooks,
            observer,
        ))
    }

    /// Store handles.
    #[must_use]
    pub fn storage(&self) -> &Storage {
        &self.inner.storage
    }

    #[must_use]
    pub fn add_to_basket(&self) -> &AddToBasket {
        &self.inner.add_to_basket
    }

    #[must_use]
    pub fn checkout(&self) -> &CheckoutInitiator {
        &self.inner.checkout
    }

    #[must_use]
    pub fn coordinator(&self) -> &PurchaseCoordinator {
        &self.inner.coordinator
    }
}
