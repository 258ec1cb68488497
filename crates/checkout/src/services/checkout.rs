//! Basket resolution and checkout start.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::instrument;

use iap_checkout_core::BasketId;

use crate::config::CheckoutSettings;
use crate::db::{BasketStore, RepositoryError};
use crate::error::IapError;
use crate::models::{Basket, CurrentUser};
use crate::routes::EXECUTE_URL_PATH;
use crate::validators::ProcessorRegistry;

use super::observer::{CheckoutEvent, CheckoutObserver};

/// A basket id as mobile clients send it: a JSON number or a numeric string.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum BasketRef {
    Id(i64),
    Text(String),
}

impl BasketRef {
    /// The id exactly as the client sent it, for error messages.
    #[must_use]
    pub fn as_sent(&self) -> String {
        match self {
            Self::Id(id) => id.to_string(),
            Self::Text(text) => text.clone(),
        }
    }

    fn is_blank(&self) -> bool {
        matches!(self, Self::Text(text) if text.trim().is_empty())
    }

    fn parse(&self) -> Option<BasketId> {
        match self {
            Self::Id(id) => Some(BasketId::new(*id)),
            Self::Text(text) => text.parse().ok(),
        }
    }
}

/// Looks up a basket owned by the requesting user.
#[derive(Clone)]
pub struct BasketResolver {
    baskets: Arc<dyn BasketStore>,
    observer: Arc<dyn CheckoutObserver>,
}

impl BasketResolver {
    #[must_use]
    pub fn new(baskets: Arc<dyn BasketStore>, observer: Arc<dyn CheckoutObserver>) -> Self {
        Self { baskets, observer }
    }

    /// Resolve the basket a request refers to.
    ///
    /// # Errors
    ///
    /// - `BasketIdMissing` when no id was sent
    /// - `BasketNotFound` when the id is malformed, unknown, or owned by someone else
    /// - `UnexpectedBasketError` when the basket store fails
    #[instrument(skip(self, user), fields(user_id = %user.id))]
    pub async fn resolve(
        &self,
        requested: Option<&BasketRef>,
        user: &CurrentUser,
    ) -> Result<Basket, IapError> {
        let requested = requested
            .filter(|requested| !requested.is_blank())
            .ok_or(IapError::BasketIdMissing)?;

        let Some(id) = requested.parse() else {
            return Err(self.not_found(requested.as_sent()));
        };

        match self.baskets.find_for_owner(id, user.id).await {
            Ok(Some(basket)) => Ok(basket),
            Ok(None) => Err(self.not_found(requested.as_sent())),
            Err(e) => {
                self.observer.record(CheckoutEvent::BasketLookupFailed {
                    user: user.email.clone(),
                    detail: e.to_string(),
                });
                Err(IapError::UnexpectedBasketError {
                    user: user.email.clone(),
                })
            }
        }
    }

    fn not_found(&self, basket_id: String) -> IapError {
        self.observer.record(CheckoutEvent::BasketNotFound {
            basket_id: basket_id.clone(),
        });
        IapError::BasketNotFound { id: basket_id }
    }
}

/// Body returned by `POST /checkout/`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckoutResponse {
    pub payment_page_url: String,
    pub payment_processor: String,
}

/// Freezes a basket and points the client at the execute endpoint.
#[derive(Clone)]
pub struct CheckoutInitiator {
    resolver: BasketResolver,
    baskets: Arc<dyn BasketStore>,
    registry: ProcessorRegistry,
    settings: CheckoutSettings,
    observer: Arc<dyn CheckoutObserver>,
}

impl CheckoutInitiator {
    #[must_use]
    pub fn new(
        resolver: BasketResolver,
        baskets: Arc<dyn BasketStore>,
        registry: ProcessorRegistry,
        settings: CheckoutSettings,
        observer: Arc<dyn CheckoutObserver>,
    ) -> Self {
        Self {
            resolver,
            baskets,
            registry,
            settings,
            observer,
        }
    }

    /// Freeze the basket for payment with `processor`.
    ///
    /// Freezing is idempotent; a basket that was already submitted is treated
    /// as not found.
    ///
    /// # Errors
    ///
    /// Returns the basket errors of [`BasketResolver::resolve`],
    /// `UnknownPaymentProcessor` for a disabled processor, or `Storage` if
    /// the freeze itself fails.
    #[instrument(skip(self, user), fields(user_id = %user.id))]
    pub async fn start(
        &self,
        user: &CurrentUser,
        basket: Option<&BasketRef>,
        processor: Option<&str>,
    ) -> Result<CheckoutResponse, IapError> {
        if basket.is_none_or(BasketRef::is_blank) {
            return Err(IapError::BasketIdMissing);
        }

        let name = processor.unwrap_or_default().trim();
        let processor = self
            .registry
            .resolve(name)
            .ok_or_else(|| IapError::UnknownPaymentProcessor {
                name: name.to_string(),
            })?;

        let resolved = self.resolver.resolve(basket, user).await?;
        if !resolved.status.can_freeze() {
            return Err(IapError::BasketNotFound {
                id: resolved.id.to_string(),
            });
        }

        let frozen = match self.baskets.freeze(resolved.id).await {
            Ok(frozen) => frozen,
            // Submitted between the lookup and the freeze
            Err(RepositoryError::Conflict(_)) => {
                return Err(IapError::BasketNotFound {
                    id: resolved.id.to_string(),
                });
            }
            Err(e) => return Err(e.into()),
        };

        self.observer.record(CheckoutEvent::CheckoutStarted {
            user: user.email.clone(),
            basket: frozen.id,
            processor,
            skus: frozen.lines.iter().map(|line| line.sku.clone()).collect(),
        });

        Ok(CheckoutResponse {
            payment_page_url: format!(
                "{}{EXECUTE_URL_PATH}?payment_processor={}&basket_id={}",
                self.settings.base_url(),
                processor.name(),
                frozen.id
            ),
            payment_processor: processor.name().to_string(),
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::Arc;

    use async_trait::async_trait;
    use tracing::Level;

    use iap_checkout_core::{BasketStatus, Email, PaymentProcessor, SiteId, UserId};

    use super::*;
    use crate::db::MemoryStore;
    use crate::services::observer::RecordingObserver;
    use crate::validators::{PurchaseAttempt, ReceiptValidator, ValidationError, ValidationResult};

    struct Unused(PaymentProcessor);

    #[async_trait]
    impl ReceiptValidator for Unused {
        fn processor(&self) -> PaymentProcessor {
            self.0
        }

        async fn validate(
            &self,
            _attempt: &PurchaseAttempt,
        ) -> Result<ValidationResult, ValidationError> {
            Err(ValidationError::Misconfigured("not used".to_string()))
        }
    }

    fn user(id: i64) -> CurrentUser {
        CurrentUser {
            id: UserId::new(id),
            email: Email::parse(&format!("user{id}@example.org")).unwrap(),
            username: format!("user{id}"),
        }
    }

    fn initiator(store: &Arc<MemoryStore>, observer: &RecordingObserver) -> CheckoutInitiator {
        let observer: Arc<dyn CheckoutObserver> = Arc::new(observer.clone());
        CheckoutInitiator::new(
            BasketResolver::new(store.clone(), observer.clone()),
            store.clone(),
            ProcessorRegistry::new().with(Arc::new(Unused(PaymentProcessor::AndroidIap))),
            CheckoutSettings {
                base_url: "https://ecommerce.example.org/".to_string(),
                site_id: SiteId::new(1),
                order_number_prefix: "IAP".to_string(),
            },
            observer,
        )
    }

    #[tokio::test]
    async fn test_freezes_and_returns_execute_url() {
        let store = Arc::new(MemoryStore::new());
        let observer = RecordingObserver::new();
        let basket = store.insert_basket(UserId::new(1), SiteId::new(1), BasketStatus::Open, vec![]);

        let response = initiator(&store, &observer)
            .start(&user(1), Some(&BasketRef::Id(basket.id.as_i64())), Some("android-iap"))
            .await
            .unwrap();

        assert_eq!(
            response.payment_page_url,
            format!(
                "https://ecommerce.example.org/api/iap/v1/execute/?payment_processor=android-iap&basket_id={}",
                basket.id
            )
        );
        assert_eq!(response.payment_processor, "android-iap");
        assert_eq!(store.basket(basket.id).unwrap().status, BasketStatus::Frozen);
    }

    #[tokio::test]
    async fn test_refreezing_is_not_an_error() {
        let store = Arc::new(MemoryStore::new());
        let observer = RecordingObserver::new();
        let basket = store.insert_basket(UserId::new(1), SiteId::new(1), BasketStatus::Frozen, vec![]);
        let requested = BasketRef::Text(basket.id.to_string());

        let initiator = initiator(&store, &observer);
        initiator.start(&user(1), Some(&requested), Some("android-iap")).await.unwrap();
        initiator.start(&user(1), Some(&requested), Some("android-iap")).await.unwrap();

        assert_eq!(store.basket(basket.id).unwrap().status, BasketStatus::Frozen);
    }

    #[tokio::test]
    async fn test_other_owner_and_submitted_are_not_found() {
        let store = Arc::new(MemoryStore::new());
        let observer = RecordingObserver::new();
        let theirs = store.insert_basket(UserId::new(2), SiteId::new(1), BasketStatus::Open, vec![]);
        let submitted =
            store.insert_basket(UserId::new(1), SiteId::new(1), BasketStatus::Submitted, vec![]);
        let initiator = initiator(&store, &observer);

        for basket in [&theirs, &submitted] {
            let err = initiator
                .start(&user(1), Some(&BasketRef::Id(basket.id.as_i64())), Some("android-iap"))
                .await
                .unwrap_err();
            assert_eq!(err.to_string(), format!("Basket [{}] not found.", basket.id));
        }
        assert_eq!(store.basket(theirs.id).unwrap().status, BasketStatus::Open);
        assert!(observer.logged(Level::ERROR, &format!("Basket [{}] not found.", theirs.id)));
    }

    #[tokio::test]
    async fn test_missing_id_and_unknown_processor() {
        let store = Arc::new(MemoryStore::new());
        let observer = RecordingObserver::new();
        let initiator = initiator(&store, &observer);

        let err = initiator.start(&user(1), None, Some("android-iap")).await.unwrap_err();
        assert!(matches!(err, IapError::BasketIdMissing));

        let err = initiator
            .start(&user(1), Some(&BasketRef::Id(1)), Some("ios-iap"))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "Payment processor [ios-iap] not found.");
    }

    #[tokio::test]
    async fn test_malformed_id_is_not_found() {
        let store = Arc::new(MemoryStore::new());
        let observer = RecordingObserver::new();
        let resolver = BasketResolver::new(store, Arc::new(observer.clone()));

        let err = resolver
            .resolve(Some(&BasketRef::Text("abc".to_string())), &user(1))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "Basket [abc] not found.");
    }
}
