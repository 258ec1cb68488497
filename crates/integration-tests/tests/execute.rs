//! Integration tests for `POST /api/iap/v1/execute/`.
//!
//! Covers the purchase guarantees mobile clients rely on: a failed receipt
//! never creates an order, resubmission never creates a second one, and a
//! failing post-order hook never looks like a failed purchase.

#![allow(clippy::unwrap_used)]

use std::sync::Arc;

use axum::http::StatusCode;
use serde_json::{Value, json};
use tracing::Level;

use iap_checkout::models::Basket;
use iap_checkout::services::PurchaseStage;
use iap_checkout::services::observer::{ORDER_COMPLETED_EVENT, PURCHASE_VIEW_EVENT};
use iap_checkout::validators::ValidationError;
use iap_checkout_core::{BasketStatus, PaymentProcessor};
use iap_checkout_integration_tests::{FailingHook, StubValidator, TestApp, UnreachableBaskets};

const EXECUTE: &str = "/api/iap/v1/execute/";

fn android_payload(basket: &Basket) -> Value {
    json!({
        "basket_id": basket.id,
        "payment_processor": "android-iap",
        "transactionId": "GPA.3385-0131-4207-52919",
        "productId": "org.example.mobile.verified",
        "purchaseToken": "inapp:org.example.mobile:android.test.purchased",
    })
}

#[tokio::test]
async fn test_android_purchase_places_one_order() {
    let app = TestApp::approving();
    let product = app.product("A1", 49);
    let basket = app.basket(BasketStatus::Frozen, &[&product]);

    let response = app.post_json(EXECUTE, &android_payload(&basket)).await;

    assert_eq!(response.status, StatusCode::OK);
    let orders = app.store.orders_for_basket(basket.id);
    assert_eq!(orders.len(), 1);
    let order_data = &response.body["order_data"];
    assert_eq!(order_data["number"], orders[0].number);
    assert_eq!(order_data["total_excl_tax"], "49.00");
    assert_eq!(order_data["payment_processor"], "android-iap");
    assert_eq!(order_data["user"]["email"], "learner@example.org");
    assert_eq!(order_data["lines"][0]["product"]["sku"], "A1");
    assert_eq!(
        app.store.basket(basket.id).unwrap().status,
        BasketStatus::Submitted
    );
    assert_eq!(app.store.payment_count(), 1);

    assert!(app.observer.logged(Level::INFO, PURCHASE_VIEW_EVENT));
    assert!(app.observer.logged(Level::INFO, ORDER_COMPLETED_EVENT));
    assert_eq!(
        app.observer.stages(),
        vec![
            PurchaseStage::BasketResolved,
            PurchaseStage::PaymentRecorded,
            PurchaseStage::OrderPlaced,
            PurchaseStage::PostOrderComplete,
        ]
    );
}

#[tokio::test]
async fn test_ios_purchase_places_one_order() {
    let app = TestApp::approving();
    let product = app.product("A1", 49);
    let basket = app.basket(BasketStatus::Frozen, &[&product]);

    let response = app
        .post_json(
            EXECUTE,
            &json!({
                "basket_id": basket.id.to_string(),
                "payment_processor": "ios-iap",
                "transactionId": "1000000845215231",
                "productId": "org.example.mobile.verified",
                "purchaseToken": "ZmFrZS1yZWNlaXB0",
            }),
        )
        .await;

    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.body["order_data"]["payment_processor"], "ios-iap");
    assert_eq!(app.store.orders_for_basket(basket.id).len(), 1);
}

#[tokio::test]
async fn test_unknown_basket_is_not_found_and_logged() {
    let app = TestApp::approving();

    let response = app
        .post_json(
            EXECUTE,
            &json!({
                "basket_id": 987_654,
                "payment_processor": "android-iap",
                "transactionId": "GPA.1",
                "productId": "p",
                "purchaseToken": "t",
            }),
        )
        .await;

    assert_eq!(response.status, StatusCode::BAD_REQUEST);
    assert_eq!(response.error(), Some("Basket [987654] not found."));
    assert!(app.observer.logged(Level::ERROR, "Basket [987654] not found."));
}

#[tokio::test]
async fn test_missing_basket_id_is_reported_as_json() {
    let app = TestApp::approving();

    let response = app
        .post_json(
            EXECUTE,
            &json!({
                "payment_processor": "android-iap",
                "transactionId": "GPA.1",
                "productId": "p",
                "purchaseToken": "t",
            }),
        )
        .await;

    assert_eq!(response.status, StatusCode::BAD_REQUEST);
    assert_eq!(response.body, json!({ "error": "Basket id is not provided" }));
    assert_eq!(response.content_type.as_deref(), Some("application/json"));
}

#[tokio::test]
async fn test_rejected_receipt_creates_no_order() {
    let app = TestApp::builder()
        .validator(StubValidator::rejecting(
            PaymentProcessor::AndroidIap,
            ValidationError::InvalidReceipt("token unknown to Google Play".to_string()),
        ))
        .build();
    let product = app.product("A1", 49);
    let basket = app.basket(BasketStatus::Frozen, &[&product]);

    let response = app.post_json(EXECUTE, &android_payload(&basket)).await;

    assert_eq!(response.status, StatusCode::BAD_REQUEST);
    assert_eq!(
        response.error(),
        Some("An error occurred during payment handling.")
    );
    assert!(app.store.orders_for_basket(basket.id).is_empty());
    assert_eq!(app.store.payment_count(), 0);
    assert!(
        app.observer
            .logged(Level::INFO, "Payment [GPA.3385-0131-4207-52919] approved by payer [1000]")
    );
    assert!(app.observer.messages_at(Level::ERROR).is_empty());
}

#[tokio::test]
async fn test_store_outage_looks_the_same_to_the_client() {
    let app = TestApp::builder()
        .validator(StubValidator::rejecting(
            PaymentProcessor::AndroidIap,
            ValidationError::Transient("connection reset".to_string()),
        ))
        .build();
    let product = app.product("A1", 49);
    let basket = app.basket(BasketStatus::Frozen, &[&product]);

    let response = app.post_json(EXECUTE, &android_payload(&basket)).await;

    assert_eq!(response.status, StatusCode::BAD_REQUEST);
    assert_eq!(
        response.error(),
        Some("An error occurred during payment handling.")
    );
    assert!(app.store.orders_for_basket(basket.id).is_empty());
}

#[tokio::test]
async fn test_resubmission_conflicts_and_keeps_one_order() {
    let validator = StubValidator::approving(PaymentProcessor::AndroidIap);
    let app = TestApp::builder().validator(validator.clone()).build();
    let product = app.product("A1", 49);
    let basket = app.basket(BasketStatus::Frozen, &[&product]);

    let first = app.post_json(EXECUTE, &android_payload(&basket)).await;
    let second = app.post_json(EXECUTE, &android_payload(&basket)).await;

    assert_eq!(first.status, StatusCode::OK);
    assert_eq!(second.status, StatusCode::CONFLICT);
    assert_eq!(
        second.error(),
        Some("The course has already been paid for on this device by the associated Apple ID.")
    );
    assert_eq!(app.store.orders_for_basket(basket.id).len(), 1);
    assert_eq!(app.store.payment_count(), 1);
    assert_eq!(validator.calls(), 1);
}

#[tokio::test]
async fn test_receipt_reused_for_another_basket_conflicts() {
    let app = TestApp::approving();
    let product = app.product("A1", 49);
    let first = app.basket(BasketStatus::Frozen, &[&product]);
    let second = app.basket(BasketStatus::Frozen, &[&product]);

    app.post_json(EXECUTE, &android_payload(&first)).await;
    let response = app.post_json(EXECUTE, &android_payload(&second)).await;

    assert_eq!(response.status, StatusCode::CONFLICT);
    assert!(app.store.orders_for_basket(second.id).is_empty());
}

#[tokio::test]
async fn test_consumed_purchase_conflicts() {
    let app = TestApp::builder()
        .validator(StubValidator::rejecting(
            PaymentProcessor::IosIap,
            ValidationError::AlreadyConsumed,
        ))
        .build();
    let product = app.product("A1", 49);
    let basket = app.basket(BasketStatus::Frozen, &[&product]);

    let response = app
        .post_json(
            EXECUTE,
            &json!({
                "basket_id": basket.id,
                "payment_processor": "ios-iap",
                "transactionId": "1000000845215231",
                "productId": "org.example.mobile.verified",
                "purchaseToken": "ZmFrZS1yZWNlaXB0",
            }),
        )
        .await;

    assert_eq!(response.status, StatusCode::CONFLICT);
    assert!(app.store.orders_for_basket(basket.id).is_empty());
}

#[tokio::test]
async fn test_failing_hook_keeps_order_and_returns_ok() {
    let app = TestApp::builder()
        .validator(StubValidator::approving(PaymentProcessor::AndroidIap))
        .hook(Arc::new(FailingHook))
        .build();
    let product = app.product("A1", 49);
    let basket = app.basket(BasketStatus::Frozen, &[&product]);

    let response = app.post_json(EXECUTE, &android_payload(&basket)).await;

    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(
        response.body,
        json!({ "error": "An error occurred during post order operations." })
    );
    let orders = app.store.orders_for_basket(basket.id);
    assert_eq!(orders.len(), 1);
    assert!(app.observer.logged(
        Level::ERROR,
        &format!("Post order operation [failing] failed for order [{}]", orders[0].number)
    ));
    // Remaining hooks still ran
    assert!(app.observer.logged(Level::INFO, ORDER_COMPLETED_EVENT));
}

#[tokio::test]
async fn test_disabled_processor_is_a_payment_error() {
    let app = TestApp::builder()
        .validator(StubValidator::approving(PaymentProcessor::AndroidIap))
        .build();
    let product = app.product("A1", 49);
    let basket = app.basket(BasketStatus::Frozen, &[&product]);

    let mut payload = android_payload(&basket);
    payload["payment_processor"] = json!("ios-iap");
    let response = app.post_json(EXECUTE, &payload).await;

    assert_eq!(response.status, StatusCode::BAD_REQUEST);
    assert_eq!(
        response.error(),
        Some("An error occurred during payment handling.")
    );
    assert!(app.observer.logged(
        Level::ERROR,
        &format!("Attempts to handle payment for basket [{}] failed.", basket.id)
    ));
}

#[tokio::test]
async fn test_empty_basket_cannot_become_an_order() {
    let app = TestApp::approving();
    let basket = app.basket(BasketStatus::Frozen, &[]);

    let response = app.post_json(EXECUTE, &android_payload(&basket)).await;

    assert_eq!(response.status, StatusCode::BAD_REQUEST);
    assert_eq!(
        response.error(),
        Some("An error occurred during order creation.")
    );
    assert!(app.store.orders_for_basket(basket.id).is_empty());
    assert!(app.observer.logged(
        Level::ERROR,
        &format!(
            "Order Failure: Android-Iap payment was received, but an order for basket [{}] could not be placed.",
            basket.id
        )
    ));
}

#[tokio::test]
async fn test_basket_store_failure_is_reported_with_user() {
    let app = TestApp::builder()
        .validator(StubValidator::approving(PaymentProcessor::AndroidIap))
        .baskets(Arc::new(UnreachableBaskets))
        .build();

    let response = app
        .post_json(
            EXECUTE,
            &json!({
                "basket_id": 7,
                "payment_processor": "android-iap",
                "transactionId": "GPA.1",
                "productId": "p",
                "purchaseToken": "t",
            }),
        )
        .await;

    let message =
        "An unexpected exception occurred while obtaining basket for user [learner@example.org].";
    assert_eq!(response.status, StatusCode::BAD_REQUEST);
    assert_eq!(response.body, json!({ "error": message }));
    assert!(app.observer.logged(Level::ERROR, message));
    assert_eq!(app.store.payment_count(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_submissions_place_one_order() {
    let app = Arc::new(TestApp::approving());
    let product = app.product("A1", 49);
    let basket = app.basket(BasketStatus::Frozen, &[&product]);
    let payload = android_payload(&basket);

    let submissions: Vec<_> = (0..8)
        .map(|_| {
            let app = app.clone();
            let payload = payload.clone();
            tokio::spawn(async move { app.post_json(EXECUTE, &payload).await.status })
        })
        .collect();

    let mut statuses = Vec::new();
    for submission in submissions {
        statuses.push(submission.await.unwrap());
    }

    let ok = statuses.iter().filter(|s| **s == StatusCode::OK).count();
    let conflicts = statuses.iter().filter(|s| **s == StatusCode::CONFLICT).count();
    assert_eq!(ok, 1, "statuses: {statuses:?}");
    assert_eq!(conflicts, 7, "statuses: {statuses:?}");
    assert_eq!(app.store.orders_for_basket(basket.id).len(), 1);
    assert_eq!(app.store.payment_count(), 1);
}
