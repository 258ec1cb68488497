//! Recorded store payments.

use chrono::{DateTime, Utc};

use iap_checkout_core::{BasketId, PaymentId, PaymentProcessor, Price};

/// A payment accepted from a store, unique per processor and store transaction.
#[derive(Debug, Clone, PartialEq)]
pub struct PaymentRecord {
    pub id: PaymentId,
    pub basket_id: BasketId,
    pub processor: PaymentProcessor,
    pub transaction_id: String,
    pub amount: Price,
    pub raw_response: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

/// A payment about to be recorded.
#[derive(Debug, Clone)]
pub struct NewPayment {
    pub basket_id: BasketId,
    pub processor: PaymentProcessor,
    pub transaction_id: String,
    pub amount: Price,
    pub raw_response: serde_json::Value,
}
