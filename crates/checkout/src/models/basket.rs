//! Basket records.

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;

use iap_checkout_core::{BasketId, BasketStatus, CurrencyCode, Price, ProductId, SiteId, UserId};

/// Attribute key recording whether the purchaser opted into marketing email.
pub const EMAIL_OPT_IN_ATTRIBUTE: &str = "email_opt_in";

/// A basket whose lines are priced in more than one currency.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("basket {basket} mixes {first} and {other} prices")]
pub struct MixedCurrency {
    pub basket: BasketId,
    pub first: CurrencyCode,
    pub other: CurrencyCode,
}

/// A purchaser's basket on one site.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Basket {
    pub id: BasketId,
    pub owner: UserId,
    pub site: SiteId,
    pub status: BasketStatus,
    pub lines: Vec<BasketLine>,
    pub created_at: DateTime<Utc>,
}

impl Basket {
    /// Currency of the basket, taken from its first line.
    #[must_use]
    pub fn currency(&self) -> CurrencyCode {
        self.lines
            .first()
            .map(|line| line.unit_price.currency)
            .unwrap_or_default()
    }

    /// Sum of all line prices.
    ///
    /// # Errors
    ///
    /// Returns [`MixedCurrency`] when lines disagree on the currency.
    pub fn total(&self) -> Result<Price, MixedCurrency> {
        let currency = self.currency();
        if let Some(other) = self
            .lines
            .iter()
            .map(|line| line.unit_price.currency)
            .find(|other| *other != currency)
        {
            return Err(MixedCurrency {
                basket: self.id,
                first: currency,
                other,
            });
        }
        let amount = self
            .lines
            .iter()
            .map(|line| line.line_price().amount)
            .sum();
        Ok(Price::new(amount, currency))
    }

    /// Whether the basket contains no lines.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }
}

/// One product line in a basket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BasketLine {
    pub product_id: ProductId,
    pub sku: String,
    pub title: String,
    pub quantity: u32,
    pub unit_price: Price,
}

impl BasketLine {
    /// Unit price times quantity.
    #[must_use]
    pub fn line_price(&self) -> Price {
        self.unit_price.times(self.quantity)
    }
}

/// Key/value metadata attached to a basket at add-to-basket time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BasketAttribute {
    pub key: String,
    pub value: String,
}
