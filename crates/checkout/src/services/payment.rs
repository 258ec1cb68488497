//! Payment recording: validate the receipt, guard against duplicates, persist.

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, instrument};

use crate::db::{PaymentStore, RepositoryError};
use crate::models::{Basket, MixedCurrency, NewPayment, PaymentRecord};
use crate::validators::{ProcessorRegistry, PurchaseAttempt, ValidationError};

use super::duplicate_guard::{DuplicateCheck, DuplicateGuard, DuplicateReason, TransactionCheck};

/// Why a payment was not recorded.
#[derive(Debug, Error)]
pub enum PaymentError {
    /// The store did not confirm the receipt.
    #[error("receipt rejected: {0}")]
    Rejected(ValidationError),

    /// The purchase was already processed.
    #[error("duplicate purchase: {0}")]
    Duplicate(DuplicateReason),

    /// The processor has no validator at execution time.
    #[error("payment processor [{0}] is not enabled")]
    UnknownProcessor(String),

    /// The basket has no single total to charge against.
    #[error(transparent)]
    MixedCurrency(#[from] MixedCurrency),

    #[error("repository error: {0}")]
    Repository(#[from] RepositoryError),
}

impl PaymentError {
    /// Whether the failure is one the payment flow classifies.
    ///
    /// Unanticipated failures get the same client response but are logged at
    /// error level.
    #[must_use]
    pub const fn is_anticipated(&self) -> bool {
        matches!(self, Self::Rejected(_) | Self::Duplicate(_))
    }
}

/// Turns a purchase attempt into a recorded payment.
#[async_trait]
pub trait PaymentRecorder: Send + Sync {
    async fn handle_payment(
        &self,
        attempt: &PurchaseAttempt,
        basket: &Basket,
    ) -> Result<PaymentRecord, PaymentError>;
}

/// Records payments through the configured store validators.
pub struct StorePaymentRecorder {
    registry: ProcessorRegistry,
    guard: DuplicateGuard,
    payments: Arc<dyn PaymentStore>,
}

impl StorePaymentRecorder {
    #[must_use]
    pub fn new(
        registry: ProcessorRegistry,
        guard: DuplicateGuard,
        payments: Arc<dyn PaymentStore>,
    ) -> Self {
        Self {
            registry,
            guard,
            payments,
        }
    }
}

#[async_trait]
impl PaymentRecorder for StorePaymentRecorder {
    #[instrument(skip_all, fields(basket_id = %basket.id, processor = %attempt.processor))]
    async fn handle_payment(
        &self,
        attempt: &PurchaseAttempt,
        basket: &Basket,
    ) -> Result<PaymentRecord, PaymentError> {
        let validator = self
            .registry
            .validator(attempt.processor)
            .ok_or_else(|| PaymentError::UnknownProcessor(attempt.processor.to_string()))?;

        // Skip the store call entirely for a basket that already has an order
        if let DuplicateCheck::Duplicate(reason) = self.guard.check_basket(basket.id).await? {
            return Err(PaymentError::Duplicate(reason));
        }

        let amount = basket.total()?;

        let validation = validator.validate(attempt).await.map_err(|e| match e {
            ValidationError::AlreadyConsumed => {
                PaymentError::Duplicate(DuplicateReason::ConsumedAtStore)
            }
            other => PaymentError::Rejected(other),
        })?;

        match self
            .guard
            .check_transaction(basket.id, attempt.processor, &validation.store_order_id)
            .await?
        {
            TransactionCheck::Clear => {}
            TransactionCheck::Resume(payment) => {
                debug!(payment_id = %payment.id, "Resuming payment recorded without an order");
                return Ok(payment);
            }
            TransactionCheck::Duplicate(reason) => return Err(PaymentError::Duplicate(reason)),
        }

        let payment = self
            .payments
            .record(NewPayment {
                basket_id: basket.id,
                processor: attempt.processor,
                transaction_id: validation.store_order_id.clone(),
                amount,
                raw_response: validation.raw_response,
            })
            .await
            .map_err(|e| match e {
                RepositoryError::Conflict(_) => {
                    PaymentError::Duplicate(DuplicateReason::PaymentRecorded {
                        transaction_id: validation.store_order_id.clone(),
                    })
                }
                other => PaymentError::Repository(other),
            })?;

        debug!(payment_id = %payment.id, "Payment recorded");
        Ok(payment)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use rust_decimal::Decimal;

    use iap_checkout_core::{
        BasketStatus, CurrencyCode, PaymentProcessor, Price, ProductId, SiteId, UserId,
    };

    use super::*;
    use crate::db::{MemoryStore, OrderStore};
    use crate::models::{BasketLine, NewOrder};
    use crate::validators::{ReceiptValidator, ValidationResult};

    struct Scripted {
        outcome: Result<String, ValidationError>,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl ReceiptValidator for Scripted {
        fn processor(&self) -> PaymentProcessor {
            PaymentProcessor::AndroidIap
        }

        async fn validate(
            &self,
            attempt: &PurchaseAttempt,
        ) -> Result<ValidationResult, ValidationError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.outcome.clone().map(|store_order_id| ValidationResult {
                store_order_id,
                product_id: attempt.product_id.clone(),
                raw_response: serde_json::json!({ "purchaseState": 0 }),
            })
        }
    }

    fn setup(
        outcome: Result<String, ValidationError>,
    ) -> (Arc<MemoryStore>, Arc<Scripted>, StorePaymentRecorder, Basket) {
        let store = Arc::new(MemoryStore::new());
        let validator = Arc::new(Scripted {
            outcome,
            calls: AtomicUsize::new(0),
        });
        let recorder = StorePaymentRecorder::new(
            ProcessorRegistry::new().with(validator.clone()),
            DuplicateGuard::new(store.clone(), store.clone()),
            store.clone(),
        );
        let basket = store.insert_basket(
            UserId::new(1),
            SiteId::new(1),
            BasketStatus::Frozen,
            vec![BasketLine {
                product_id: ProductId::new(99),
                sku: "SKU1".to_string(),
                title: "Verified seat".to_string(),
                quantity: 1,
                unit_price: Price::new(Decimal::new(4999, 2), CurrencyCode::USD),
            }],
        );
        (store, validator, recorder, basket)
    }

    fn attempt(basket: &Basket, processor: PaymentProcessor) -> PurchaseAttempt {
        PurchaseAttempt {
            basket_id: basket.id,
            processor,
            transaction_id: "GPA.1".to_string(),
            product_id: "org.example.seat".to_string(),
            receipt: "token".to_string(),
        }
    }

    #[tokio::test]
    async fn test_records_validated_payment() {
        let (store, _, recorder, basket) = setup(Ok("GPA.1".to_string()));

        let payment = recorder
            .handle_payment(&attempt(&basket, PaymentProcessor::AndroidIap), &basket)
            .await
            .unwrap();

        assert_eq!(payment.transaction_id, "GPA.1");
        assert_eq!(payment.amount.amount, Decimal::new(4999, 2));
        assert_eq!(store.payment_count(), 1);
    }

    #[tokio::test]
    async fn test_rejected_receipt_records_nothing() {
        let (store, _, recorder, basket) =
            setup(Err(ValidationError::InvalidReceipt("forged".to_string())));

        let err = recorder
            .handle_payment(&attempt(&basket, PaymentProcessor::AndroidIap), &basket)
            .await
            .unwrap_err();

        assert!(matches!(err, PaymentError::Rejected(_)));
        assert!(err.is_anticipated());
        assert_eq!(store.payment_count(), 0);
    }

    #[tokio::test]
    async fn test_consumed_purchase_is_duplicate() {
        let (_, _, recorder, basket) = setup(Err(ValidationError::AlreadyConsumed));

        let err = recorder
            .handle_payment(&attempt(&basket, PaymentProcessor::AndroidIap), &basket)
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            PaymentError::Duplicate(DuplicateReason::ConsumedAtStore)
        ));
    }

    #[tokio::test]
    async fn test_retry_without_order_resumes_recorded_payment() {
        let (store, _, recorder, basket) = setup(Ok("GPA.1".to_string()));
        let attempt = attempt(&basket, PaymentProcessor::AndroidIap);

        let first = recorder.handle_payment(&attempt, &basket).await.unwrap();
        let retry = recorder.handle_payment(&attempt, &basket).await.unwrap();

        assert_eq!(retry.id, first.id);
        assert_eq!(store.payment_count(), 1);
    }

    #[tokio::test]
    async fn test_transaction_reused_for_another_basket_is_duplicate() {
        let (store, _, recorder, basket) = setup(Ok("GPA.1".to_string()));
        let other = store.insert_basket(
            UserId::new(1),
            SiteId::new(1),
            BasketStatus::Frozen,
            basket.lines.clone(),
        );

        recorder
            .handle_payment(&attempt(&basket, PaymentProcessor::AndroidIap), &basket)
            .await
            .unwrap();
        let err = recorder
            .handle_payment(&attempt(&other, PaymentProcessor::AndroidIap), &other)
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            PaymentError::Duplicate(DuplicateReason::PaymentRecorded { .. })
        ));
        assert_eq!(store.payment_count(), 1);
    }

    #[tokio::test]
    async fn test_existing_order_skips_store_call() {
        let (store, validator, recorder, basket) = setup(Ok("GPA.1".to_string()));
        store
            .create_for_basket(
                NewOrder::from_basket(&basket, "IAP-100001".to_string(), PaymentProcessor::AndroidIap).unwrap(),
            )
            .await
            .unwrap();

        let err = recorder
            .handle_payment(&attempt(&basket, PaymentProcessor::AndroidIap), &basket)
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            PaymentError::Duplicate(DuplicateReason::OrderExists { .. })
        ));
        assert_eq!(validator.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_disabled_processor_is_unanticipated() {
        let (_, _, recorder, basket) = setup(Ok("1".to_string()));

        let err = recorder
            .handle_payment(&attempt(&basket, PaymentProcessor::IosIap), &basket)
            .await
            .unwrap_err();

        assert!(matches!(err, PaymentError::UnknownProcessor(_)));
        assert!(!err.is_anticipated());
    }
}
