//! Checkout services.
//!
//! Each flow is a small struct holding its collaborators as trait objects:
//!
//! - [`basket::AddToBasket`] - fills the open basket from SKUs
//! - [`checkout::CheckoutInitiator`] - freezes a basket for a processor
//! - [`purchase::PurchaseCoordinator`] - receipt to payment to order
//!
//! The coordinator composes [`payment::PaymentRecorder`],
//! [`order_placement::OrderPlacer`] and [`post_order::PostOrderHook`]s, and
//! reports through [`observer::CheckoutObserver`].

pub mod basket;
pub mod checkout;
pub mod duplicate_guard;
pub mod observer;
pub mod order_placement;
pub mod payment;
pub mod post_order;
pub mod purchase;

pub use basket::{AddToBasket, BasketSummary};
pub use checkout::{BasketRef, BasketResolver, CheckoutInitiator, CheckoutResponse};
pub use duplicate_guard::DuplicateGuard;
pub use observer::{CheckoutEvent, CheckoutObserver, RecordingObserver, TracingObserver};
pub use order_placement::{OrderPlacer, StoreOrderPlacer};
pub use payment::{PaymentRecorder, StorePaymentRecorder};
pub use post_order::{AnalyticsHook, FulfillmentWebhookHook, PostOrderHook};
pub use purchase::{ExecuteRequest, PurchaseCoordinator, PurchaseStage};
