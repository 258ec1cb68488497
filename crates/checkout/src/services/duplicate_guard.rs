//! Detects resubmission of a purchase that was already processed.
//!
//! A purchase counts as processed once its basket has an order. A payment
//! recorded for the same basket without an order is an attempt that failed
//! at order placement; the retry resumes from that payment.
//!
//! The guard only reads. Storage still enforces the same invariants with
//! unique constraints, so a request racing past the guard ends in a
//! [`RepositoryError::Conflict`] instead of a second payment or order.

use std::fmt;
use std::sync::Arc;

use iap_checkout_core::{BasketId, PaymentProcessor};

use crate::db::{OrderStore, PaymentStore, RepositoryError};
use crate::models::PaymentRecord;

/// Why a purchase counts as already processed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DuplicateReason {
    /// A non-cancelled order already references the basket.
    OrderExists { number: String },
    /// The store transaction was already recorded as a payment.
    PaymentRecorded { transaction_id: String },
    /// The store reports the purchase as consumed.
    ConsumedAtStore,
}

impl fmt::Display for DuplicateReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OrderExists { number } => write!(f, "order {number} already exists"),
            Self::PaymentRecorded { transaction_id } => {
                write!(f, "transaction {transaction_id} was already recorded")
            }
            Self::ConsumedAtStore => f.write_str("purchase was already consumed at the store"),
        }
    }
}

/// Outcome of a duplicate check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DuplicateCheck {
    Clear,
    Duplicate(DuplicateReason),
}

/// Outcome of looking up a store transaction.
#[derive(Debug, Clone, PartialEq)]
pub enum TransactionCheck {
    /// Never recorded.
    Clear,
    /// Recorded for this basket by an attempt that never placed its order.
    Resume(PaymentRecord),
    /// Recorded for another basket.
    Duplicate(DuplicateReason),
}

/// Read-only idempotency check over orders and payments.
#[derive(Clone)]
pub struct DuplicateGuard {
    orders: Arc<dyn OrderStore>,
    payments: Arc<dyn PaymentStore>,
}

impl DuplicateGuard {
    #[must_use]
    pub fn new(orders: Arc<dyn OrderStore>, payments: Arc<dyn PaymentStore>) -> Self {
        Self { orders, payments }
    }

    /// Whether the basket already has a non-cancelled order.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError` if the order store fails.
    pub async fn check_basket(&self, basket: BasketId) -> Result<DuplicateCheck, RepositoryError> {
        Ok(match self.orders.find_for_basket(basket).await? {
            Some(order) => DuplicateCheck::Duplicate(DuplicateReason::OrderExists {
                number: order.number,
            }),
            None => DuplicateCheck::Clear,
        })
    }

    /// Whether the store transaction was already recorded for the processor.
    ///
    /// Call after [`Self::check_basket`] came back clear: a payment of the
    /// same basket then has no order yet and can be resumed.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError` if the payment store fails.
    pub async fn check_transaction(
        &self,
        basket: BasketId,
        processor: PaymentProcessor,
        transaction_id: &str,
    ) -> Result<TransactionCheck, RepositoryError> {
        Ok(
            match self
                .payments
                .find_by_transaction(processor, transaction_id)
                .await?
            {
                Some(payment) if payment.basket_id == basket => TransactionCheck::Resume(payment),
                Some(payment) => TransactionCheck::Duplicate(DuplicateReason::PaymentRecorded {
                    transaction_id: payment.transaction_id,
                }),
                None => TransactionCheck::Clear,
            },
        )
    }
}
