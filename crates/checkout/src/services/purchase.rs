//! Purchase execution: the receipt-to-order state machine.
//!
//! ```text
//! Received -> BasketResolved -> PaymentRecorded -> OrderPlaced -> PostOrderComplete
//!     \             \                 \                 \
//!      +-------------+-----------------+-----------------+--> Failed
//! ```
//!
//! Every failure maps to exactly one [`IapError`]. Anticipated and
//! unanticipated payment failures look the same to the client; only the log
//! severity differs. A post-order hook failure is reported with `200 OK`
//! because the order already exists.

use std::sync::Arc;

use tracing::instrument;

use iap_checkout_core::{BasketId, PaymentProcessor};

use crate::error::IapError;
use crate::models::{Basket, CurrentUser, Order, OrderData};
use crate::validators::{ProcessorRegistry, PurchaseAttempt};

use super::checkout::{BasketRef, BasketResolver};
use super::observer::{CheckoutEvent, CheckoutObserver, PURCHASE_VIEW_EVENT};
use super::order_placement::{OrderPlacementError, OrderPlacer};
use super::payment::{PaymentError, PaymentRecorder};
use super::post_order::PostOrderHook;

/// Stages of one purchase execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PurchaseStage {
    Received,
    BasketResolved,
    PaymentRecorded,
    OrderPlaced,
    PostOrderComplete,
    Failed,
}

/// A receipt submission as received from the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecuteRequest {
    pub basket_id: Option<BasketRef>,
    pub payment_processor: String,
    pub transaction_id: String,
    pub product_id: String,
    pub receipt: String,
}

/// Runs the purchase state machine for one request.
#[derive(Clone)]
pub struct PurchaseCoordinator {
    resolver: BasketResolver,
    registry: ProcessorRegistry,
    payments: Arc<dyn PaymentRecorder>,
    orders: Arc<dyn OrderPlacer>,
    hooks: Vec<Arc<dyn PostOrderHook>>,
    observer: Arc<dyn CheckoutObserver>,
}

/// Tracks the current stage and reports every transition.
struct Progress<'a> {
    stage: PurchaseStage,
    basket: Option<BasketId>,
    observer: &'a dyn CheckoutObserver,
}

impl Progress<'_> {
    fn advance(&mut self, to: PurchaseStage) {
        self.observer.record(CheckoutEvent::Transition {
            basket: self.basket,
            from: self.stage,
            to,
        });
        self.stage = to;
    }

    fn fail(&mut self, error: IapError) -> IapError {
        self.advance(PurchaseStage::Failed);
        error
    }
}

impl PurchaseCoordinator {
    #[must_use]
    pub fn new(
        resolver: BasketResolver,
        registry: ProcessorRegistry,
        payments: Arc<dyn PaymentRecorder>,
        orders: Arc<dyn OrderPlacer>,
        hooks: Vec<Arc<dyn PostOrderHook>>,
        observer: Arc<dyn CheckoutObserver>,
    ) -> Self {
        Self {
            resolver,
            registry,
            payments,
            orders,
            hooks,
            observer,
        }
    }

    /// Validate the receipt, record the payment and place the order.
    ///
    /// # Errors
    ///
    /// Returns the [`IapError`] the failed stage maps to. A post-order
    /// failure returns `PostOrderOperationError` with the order in place.
    #[instrument(skip_all, fields(user_id = %user.id, processor = %request.payment_processor))]
    pub async fn execute(
        &self,
        user: &CurrentUser,
        request: ExecuteRequest,
    ) -> Result<OrderData, IapError> {
        let mut progress = Progress {
            stage: PurchaseStage::Received,
            basket: None,
            observer: self.observer.as_ref(),
        };
        self.observer.record(CheckoutEvent::Analytics {
            name: PURCHASE_VIEW_EVENT,
            user: user.id,
        });

        let basket = match self.resolver.resolve(request.basket_id.as_ref(), user).await {
            Ok(basket) => basket,
            Err(e) => return Err(progress.fail(e)),
        };
        progress.basket = Some(basket.id);
        progress.advance(PurchaseStage::BasketResolved);

        let processor = match self.record_payment(user, &request, &basket).await {
            Ok(processor) => processor,
            Err(e) => return Err(progress.fail(e)),
        };
        progress.advance(PurchaseStage::PaymentRecorded);

        let order = match self.orders.place_order(&basket, processor).await {
            Ok(order) => order,
            // A concurrent submission resumed the same payment and won
            Err(e @ OrderPlacementError::AlreadyPlaced(_)) => {
                self.observer.record(CheckoutEvent::PaymentRejected {
                    basket: basket.id,
                    reason: e.to_string(),
                });
                return Err(progress.fail(IapError::AlreadyPaidOnDevice));
            }
            Err(e) => {
                self.observer.record(CheckoutEvent::OrderFailed {
                    processor,
                    basket: basket.id,
                    detail: e.to_string(),
                });
                return Err(progress.fail(IapError::OrderCreationError));
            }
        };
        self.observer.record(CheckoutEvent::OrderPlaced {
            basket: basket.id,
            number: order.number.clone(),
        });
        progress.advance(PurchaseStage::OrderPlaced);

        if !self.run_post_order(&order, user).await {
            return Err(progress.fail(IapError::PostOrderOperationError));
        }
        progress.advance(PurchaseStage::PostOrderComplete);

        Ok(OrderData::new(&order, user))
    }

    /// Payment stage: the attempt log fires first, before any outcome.
    async fn record_payment(
        &self,
        user: &CurrentUser,
        request: &ExecuteRequest,
        basket: &Basket,
    ) -> Result<PaymentProcessor, IapError> {
        self.observer.record(CheckoutEvent::PaymentAttempted {
            transaction_id: request.transaction_id.clone(),
            payer: user.id,
        });

        let outcome = match self.registry.resolve(&request.payment_processor) {
            Some(processor) => {
                let attempt = PurchaseAttempt {
                    basket_id: basket.id,
                    processor,
                    transaction_id: request.transaction_id.clone(),
                    product_id: request.product_id.clone(),
                    receipt: request.receipt.clone(),
                };
                self.payments
                    .handle_payment(&attempt, basket)
                    .await
                    .map(|_| processor)
            }
            None => Err(PaymentError::UnknownProcessor(
                request.payment_processor.clone(),
            )),
        };

        outcome.map_err(|e| {
            if e.is_anticipated() {
                self.observer.record(CheckoutEvent::PaymentRejected {
                    basket: basket.id,
                    reason: e.to_string(),
                });
            } else {
                self.observer.record(CheckoutEvent::PaymentFailed {
                    basket: basket.id,
                    detail: e.to_string(),
                });
            }
            match e {
                PaymentError::Duplicate(_) => IapError::AlreadyPaidOnDevice,
                _ => IapError::PaymentHandlingError,
            }
        })
    }

    /// Run every hook; returns whether all of them succeeded.
    async fn run_post_order(&self, order: &Order, user: &CurrentUser) -> bool {
        let mut all_ok = true;
        for hook in &self.hooks {
            if let Err(e) = hook.run(order, user).await {
                self.observer.record(CheckoutEvent::PostOrderFailed {
                    number: order.number.clone(),
                    hook: hook.name(),
                    detail: e.to_string(),
                });
                all_ok = false;
            }
        }
        all_ok
    }
}
