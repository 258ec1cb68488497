//! Purchasable catalog products.

use chrono::{DateTime, Utc};
use serde::Serialize;

use iap_checkout_core::{Price, ProductId};

/// A product as far as add-to-basket is concerned.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Product {
    pub id: ProductId,
    pub sku: String,
    pub title: String,
    pub price: Price,
    pub is_active: bool,
    pub expires: Option<DateTime<Utc>>,
}

impl Product {
    /// Whether the product can be bought at `now`.
    #[must_use]
    pub fn is_available_at(&self, now: DateTime<Utc>) -> bool {
        self.is_active && self.expires.is_none_or(|expires| expires > now)
    }
}
