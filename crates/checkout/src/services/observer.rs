//! Observability port for the checkout flows.
//!
//! Services report what happened as [`CheckoutEvent`]s instead of logging
//! inline. Production wires [`TracingObserver`], which turns each event into a
//! `tracing` event (and so a Sentry event or breadcrumb). Tests wire
//! [`RecordingObserver`] and assert on the recorded events.

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::Level;

use iap_checkout_core::{BasketId, Email, PaymentProcessor, UserId};

use super::purchase::PurchaseStage;

/// Analytics event recorded when mobile clients add items to a basket.
pub const BASKET_ADD_EVENT: &str = "Mobile Basket Add Items View Called";

/// Analytics event recorded when a mobile purchase is submitted.
pub const PURCHASE_VIEW_EVENT: &str = "Mobile Course Purchase View Called";

/// Analytics event recorded after an order is placed.
pub const ORDER_COMPLETED_EVENT: &str = "Order Completed";

/// Something worth recording that happened during a checkout flow.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckoutEvent {
    /// Named analytics event for a user.
    Analytics { name: &'static str, user: UserId },
    /// A requested product is not for sale right now.
    ProductUnavailable { sku: String },
    /// Checkout froze a basket for a processor.
    CheckoutStarted {
        user: Email,
        basket: BasketId,
        processor: PaymentProcessor,
        skus: Vec<String>,
    },
    /// The purchase state machine moved between stages.
    Transition {
        basket: Option<BasketId>,
        from: PurchaseStage,
        to: PurchaseStage,
    },
    /// No basket with this id belongs to the user.
    BasketNotFound { basket_id: String },
    /// The basket store failed while resolving a basket.
    BasketLookupFailed { user: Email, detail: String },
    /// A receipt was submitted; always recorded before the outcome is known.
    PaymentAttempted { transaction_id: String, payer: UserId },
    /// The store or duplicate guard refused the payment.
    PaymentRejected { basket: BasketId, reason: String },
    /// Payment handling failed for a reason nobody anticipated.
    PaymentFailed { basket: BasketId, detail: String },
    /// Payment was received but no order could be placed.
    OrderFailed {
        processor: PaymentProcessor,
        basket: BasketId,
        detail: String,
    },
    /// An order exists for the basket.
    OrderPlaced { basket: BasketId, number: String },
    /// A post-order hook failed after the order was placed.
    PostOrderFailed {
        number: String,
        hook: &'static str,
        detail: String,
    },
}

impl CheckoutEvent {
    /// Severity the event is logged at.
    #[must_use]
    pub const fn level(&self) -> Level {
        match self {
            Self::Transition { .. } => Level::DEBUG,
            Self::BasketNotFound { .. }
            | Self::BasketLookupFailed { .. }
            | Self::PaymentFailed { .. }
            | Self::OrderFailed { .. }
            | Self::PostOrderFailed { .. } => Level::ERROR,
            Self::Analytics { .. }
            | Self::ProductUnavailable { .. }
            | Self::CheckoutStarted { .. }
            | Self::PaymentAttempted { .. }
            | Self::PaymentRejected { .. }
            | Self::OrderPlaced { .. } => Level::INFO,
        }
    }

    /// Operator-facing log line.
    #[must_use]
    pub fn message(&self) -> String {
        match self {
            Self::Analytics { name, .. } => (*name).to_string(),
            Self::ProductUnavailable { sku } => format!("Product [{sku}] is not available to buy."),
            Self::CheckoutStarted { user, skus, .. } => format!(
                "Starting payment flow for user [{user}] for products [{}].",
                skus.join(", ")
            ),
            Self::Transition { from, to, .. } => format!("Purchase moved from {from:?} to {to:?}"),
            Self::BasketNotFound { basket_id } => format!("Basket [{basket_id}] not found."),
            Self::BasketLookupFailed { user, .. } => {
                format!("An unexpected exception occurred while obtaining basket for user [{user}].")
            }
            Self::PaymentAttempted {
                transaction_id,
                payer,
            } => format!("Payment [{transaction_id}] approved by payer [{payer}]"),
            Self::PaymentRejected { basket, reason } => {
                format!("Payment for basket [{basket}] was not accepted: {reason}")
            }
            Self::PaymentFailed { basket, .. } => {
                format!("Attempts to handle payment for basket [{basket}] failed.")
            }
            Self::OrderFailed {
                processor, basket, ..
            } => format!(
                "Order Failure: {} payment was received, but an order for basket [{basket}] could not be placed.",
                processor.title()
            ),
            Self::OrderPlaced { basket, number } => {
                format!("Order [{number}] placed for basket [{basket}]")
            }
            Self::PostOrderFailed { number, hook, .. } => {
                format!("Post order operation [{hook}] failed for order [{number}]")
            }
        }
    }

    /// Internal detail kept out of the message, if any.
    #[must_use]
    pub fn detail(&self) -> Option<&str> {
        match self {
            Self::BasketLookupFailed { detail, .. }
            | Self::PaymentFailed { detail, .. }
            | Self::OrderFailed { detail, .. }
            | Self::PostOrderFailed { detail, .. } => Some(detail),
            _ => None,
        }
    }
}

/// Receives checkout events.
pub trait CheckoutObserver: Send + Sync {
    fn record(&self, event: CheckoutEvent);
}

/// Emits every event through `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingObserver;

impl CheckoutObserver for TracingObserver {
    fn record(&self, event: CheckoutEvent) {
        let message = event.message();
        let detail = event.detail().unwrap_or_default();
        let analytics = matches!(event, CheckoutEvent::Analytics { .. });

        match event.level() {
            Level::ERROR => tracing::error!(detail, "{message}"),
            Level::WARN => tracing::warn!(detail, "{message}"),
            Level::INFO => tracing::info!(analytics, "{message}"),
            _ => tracing::debug!("{message}"),
        }
    }
}

/// Keeps every event in memory.
#[derive(Debug, Clone, Default)]
pub struct RecordingObserver {
    events: Arc<Mutex<Vec<CheckoutEvent>>>,
}

impl RecordingObserver {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Every event recorded so far, oldest first.
    #[must_use]
    pub fn events(&self) -> Vec<CheckoutEvent> {
        self.events.lock().clone()
    }

    /// Messages of the events recorded at `level`.
    #[must_use]
    pub fn messages_at(&self, level: Level) -> Vec<String> {
        self.events
            .lock()
            .iter()
            .filter(|event| event.level() == level)
            .map(CheckoutEvent::message)
            .collect()
    }

    /// Whether any event at `level` has exactly this message.
    #[must_use]
    pub fn logged(&self, level: Level, message: &str) -> bool {
        self.messages_at(level).iter().any(|m| m == message)
    }

    /// Stages the purchase state machine entered, in order.
    #[must_use]
    pub fn stages(&self) -> Vec<PurchaseStage> {
        self.events
            .lock()
            .iter()
            .filter_map(|event| match event {
                CheckoutEvent::Transition { to, .. } => Some(*to),
                _ => None,
            })
            .collect()
    }
}

impl CheckoutObserver for RecordingObserver {
    fn record(&self, event: CheckoutEvent) {
        self.events.lock().push(event);
    }
}
