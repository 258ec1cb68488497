//! Integration tests for IAP checkout.
//!
//! # Running Tests
//!
//! ```bash
//! cargo test -p iap-checkout-integration-tests
//! ```
//!
//! Every test drives the real router in-process against [`MemoryStore`].
//! Receipt validation is either stubbed ([`StubValidator`]) or pointed at a
//! local Google Play stand-in ([`spawn_google_play`]).
//!
//! # Test Categories
//!
//! - `add_to_basket` - SKU resolution and exclusion rules
//! - `checkout` - basket freezing and payment URLs
//! - `execute` - receipt to order, duplicates, degraded success
//! - `google_play` - the Android validator over HTTP
//! - `app_store` - the iOS validator and its environment redirects over HTTP

#![allow(clippy::unwrap_used, clippy::missing_panics_doc)]

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use axum::{
    Json, Router,
    body::Body,
    extract::{Path, State},
    http::{Method, Request, StatusCode, header},
    response::IntoResponse,
    routing::{get, post},
};
use rust_decimal::Decimal;
use serde_json::Value;
use tower::ServiceExt;
use url::Url;

use iap_checkout::config::CheckoutSettings;
use iap_checkout::db::{BasketStore, MemoryStore, RepositoryError, Storage};
use iap_checkout::models::{Basket, BasketAttribute, BasketLine, CurrentUser, Order, Product};
use iap_checkout::routes;
use iap_checkout::services::post_order::HookError;
use iap_checkout::services::{AnalyticsHook, PostOrderHook, RecordingObserver};
use iap_checkout::state::AppState;
use iap_checkout::validators::{
    ProcessorRegistry, PurchaseAttempt, ReceiptValidator, ValidationError, ValidationResult,
};
use iap_checkout_core::{
    BasketId, BasketStatus, CurrencyCode, Email, PaymentProcessor, Price, ProductId, SiteId, UserId,
};

/// Bearer token of [`TestApp::user`].
pub const TOKEN: &str = "learner-token-0d8f3a";

/// Base URL payment page URLs are built on.
pub const BASE_URL: &str = "https://ecommerce.example.org";

/// A response with its JSON body decoded.
#[derive(Debug)]
pub struct TestResponse {
    pub status: StatusCode,
    pub content_type: Option<String>,
    pub body: Value,
}

impl TestResponse {
    /// The `error` field of an error body.
    #[must_use]
    pub fn error(&self) -> Option<&str> {
        self.body.get("error").and_then(Value::as_str)
    }
}

/// The router wired over an in-memory store.
pub struct TestApp {
    pub store: Arc<MemoryStore>,
    pub observer: RecordingObserver,
    pub user: CurrentUser,
    router: Router,
}

/// Builds a [`TestApp`] with chosen validators and hooks.
#[derive(Default)]
pub struct TestAppBuilder {
    validators: Vec<Arc<dyn ReceiptValidator>>,
    hooks: Vec<Arc<dyn PostOrderHook>>,
    baskets: Option<Arc<dyn BasketStore>>,
}

impl TestAppBuilder {
    #[must_use]
    pub fn validator(mut self, validator: Arc<dyn ReceiptValidator>) -> Self {
        self.validators.push(validator);
        self
    }

    #[must_use]
    pub fn hook(mut self, hook: Arc<dyn PostOrderHook>) -> Self {
        self.hooks.push(hook);
        self
    }

    /// Serve baskets from `baskets` instead of the memory store.
    #[must_use]
    pub fn baskets(mut self, baskets: Arc<dyn BasketStore>) -> Self {
        self.baskets = Some(baskets);
        self
    }

    #[must_use]
    pub fn build(self) -> TestApp {
        let store = Arc::new(MemoryStore::new());
        let observer = RecordingObserver::new();
        let user = CurrentUser {
            id: UserId::new(1000),
            email: Email::parse("learner@example.org").unwrap(),
            username: "learner".to_string(),
        };
        store.add_user(user.clone(), TOKEN);

        let registry = self
            .validators
            .into_iter()
            .fold(ProcessorRegistry::new(), ProcessorRegistry::with);

        let mut hooks = self.hooks;
        hooks.push(Arc::new(AnalyticsHook::new(Arc::new(observer.clone()))));

        let mut storage = Storage::memory(store.clone());
        if let Some(baskets) = self.baskets {
            storage.baskets = baskets;
        }

        let state = AppState::new(
            CheckoutSettings {
                base_url: format!("{BASE_URL}/"),
                site_id: SiteId::new(1),
                order_number_prefix: "IAP".to_string(),
            },
            storage,
            registry,
            hooks,
            Arc::new(observer.clone()),
        );

        TestApp {
            store,
            observer,
            user,
            router: routes::app(state),
        }
    }
}

impl TestApp {
    #[must_use]
    pub fn builder() -> TestAppBuilder {
        TestAppBuilder::default()
    }

    /// An app where both processors approve every receipt.
    #[must_use]
    pub fn approving() -> Self {
        Self::builder()
            .validator(StubValidator::approving(PaymentProcessor::AndroidIap))
            .validator(StubValidator::approving(PaymentProcessor::IosIap))
            .build()
    }

    /// Authenticated `GET`.
    pub async fn get(&self, uri: &str) -> TestResponse {
        self.send(Method::GET, uri, Some(TOKEN), None).await
    }

    /// Authenticated JSON `POST`.
    pub async fn post_json(&self, uri: &str, body: &Value) -> TestResponse {
        self.send(Method::POST, uri, Some(TOKEN), Some(body.to_string()))
            .await
    }

    /// Send a request with an optional bearer token and raw JSON body.
    pub async fn send(
        &self,
        method: Method,
        uri: &str,
        token: Option<&str>,
        body: Option<String>,
    ) -> TestResponse {
        let mut request = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            request = request.header(header::AUTHORIZATION, format!("Bearer {token}"));
        }
        let request = match body {
            Some(body) => request
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body)),
            None => request.body(Body::empty()),
        }
        .unwrap();

        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let content_type = response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(String::from);
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or_else(|_| {
                Value::String(String::from_utf8_lossy(&bytes).into_owned())
            })
        };

        TestResponse {
            status,
            content_type,
            body,
        }
    }

    /// Add an active catalog product.
    pub fn product(&self, sku: &str, price: i64) -> Product {
        self.store.add_product(Product {
            id: ProductId::new(0),
            sku: sku.to_string(),
            title: format!("Course {sku}"),
            price: Price::new(Decimal::from(price), CurrencyCode::USD),
            is_active: true,
            expires: None,
        })
    }

    /// A basket of the test user holding one line per product.
    pub fn basket(&self, status: BasketStatus, products: &[&Product]) -> Basket {
        self.basket_for(self.user.id, status, products)
    }

    /// A basket of any user holding one line per product.
    pub fn basket_for(&self, owner: UserId, status: BasketStatus, products: &[&Product]) -> Basket {
        let lines = products
            .iter()
            .map(|product| BasketLine {
                product_id: product.id,
                sku: product.sku.clone(),
                title: product.title.clone(),
                quantity: 1,
                unit_price: product.price,
            })
            .collect();
        self.store.insert_basket(owner, SiteId::new(1), status, lines)
    }
}

/// Stand-in store validator with a fixed verdict.
pub struct StubValidator {
    processor: PaymentProcessor,
    verdict: Result<(), ValidationError>,
    calls: AtomicUsize,
}

impl StubValidator {
    /// Approves every receipt; the store order id is the client's transaction id.
    #[must_use]
    pub fn approving(processor: PaymentProcessor) -> Arc<Self> {
        Arc::new(Self {
            processor,
            verdict: Ok(()),
            calls: AtomicUsize::new(0),
        })
    }

    /// Rejects every receipt with `error`.
    #[must_use]
    pub fn rejecting(processor: PaymentProcessor, error: ValidationError) -> Arc<Self> {
        Arc::new(Self {
            processor,
            verdict: Err(error),
            calls: AtomicUsize::new(0),
        })
    }

    /// How many receipts were submitted to the store.
    #[must_use]
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ReceiptValidator for StubValidator {
    fn processor(&self) -> PaymentProcessor {
        self.processor
    }

    async fn validate(
        &self,
        attempt: &PurchaseAttempt,
    ) -> Result<ValidationResult, ValidationError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.verdict.clone().map(|()| ValidationResult {
            store_order_id: attempt.transaction_id.clone(),
            product_id: attempt.product_id.clone(),
            raw_response: serde_json::json!({ "stub": true }),
        })
    }
}

/// A post-order hook that always fails.
pub struct FailingHook;

#[async_trait]
impl PostOrderHook for FailingHook {
    fn name(&self) -> &'static str {
        "failing"
    }

    async fn run(&self, _order: &Order, _user: &CurrentUser) -> Result<(), HookError> {
        Err(HookError::Failed("fulfillment unavailable".to_string()))
    }
}

/// A basket store whose every call fails like a lost database connection.
pub struct UnreachableBaskets;

impl UnreachableBaskets {
    fn error() -> RepositoryError {
        RepositoryError::Database(sqlx::Error::PoolTimedOut)
    }
}

#[async_trait]
impl BasketStore for UnreachableBaskets {
    async fn find_for_owner(
        &self,
        _id: BasketId,
        _owner: UserId,
    ) -> Result<Option<Basket>, RepositoryError> {
        Err(Self::error())
    }

    async fn open_basket(&self, _owner: UserId, _site: SiteId) -> Result<Basket, RepositoryError> {
        Err(Self::error())
    }

    async fn replace_lines(
        &self,
        _id: BasketId,
        _lines: Vec<BasketLine>,
    ) -> Result<Basket, RepositoryError> {
        Err(Self::error())
    }

    async fn set_attribute(
        &self,
        _id: BasketId,
        _key: &str,
        _value: &str,
    ) -> Result<(), RepositoryError> {
        Err(Self::error())
    }

    async fn attributes(&self, _id: BasketId) -> Result<Vec<BasketAttribute>, RepositoryError> {
        Err(Self::error())
    }

    async fn freeze(&self, _id: BasketId) -> Result<Basket, RepositoryError> {
        Err(Self::error())
    }
}

/// Serve a Google Play Developer API stand-in on a random local port.
///
/// `purchases` maps purchase tokens to the `ProductPurchase` JSON returned
/// for them; unknown tokens get `404`. Returns the API base URL.
pub async fn spawn_google_play(purchases: HashMap<String, Value>) -> Url {
    async fn purchase(
        State(purchases): State<Arc<HashMap<String, Value>>>,
        Path((_package, _product, token)): Path<(String, String, String)>,
    ) -> axum::response::Response {
        match purchases.get(&token) {
            Some(body) => Json(body.clone()).into_response(),
            None => StatusCode::NOT_FOUND.into_response(),
        }
    }

    let app = Router::new()
        .route(
            "/androidpublisher/v3/applications/{package}/purchases/products/{product}/tokens/{token}",
            get(purchase),
        )
        .with_state(Arc::new(purchases));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    Url::parse(&format!("http://{addr}/")).unwrap()
}

/// A local `verifyReceipt` pair: production and sandbox hosts with fixed answers.
pub struct AppStoreStandIn {
    /// Base URL of the production host; `verifyReceipt` is joined onto it.
    pub production_url: Url,
    /// Base URL of the sandbox host.
    pub sandbox_url: Url,
    production_calls: Arc<AtomicUsize>,
    sandbox_calls: Arc<AtomicUsize>,
}

impl AppStoreStandIn {
    /// Receipts posted to the production host.
    #[must_use]
    pub fn production_calls(&self) -> usize {
        self.production_calls.load(Ordering::SeqCst)
    }

    /// Receipts posted to the sandbox host.
    #[must_use]
    pub fn sandbox_calls(&self) -> usize {
        self.sandbox_calls.load(Ordering::SeqCst)
    }
}

#[derive(Clone)]
struct VerifyReceiptHost {
    answer: Arc<Value>,
    calls: Arc<AtomicUsize>,
}

/// Serve App Store `verifyReceipt` stand-ins on a random local port.
///
/// Every receipt posted to production gets `production`, every receipt posted
/// to the sandbox gets `sandbox`.
pub async fn spawn_app_store(production: Value, sandbox: Value) -> AppStoreStandIn {
    async fn verify(State(host): State<VerifyReceiptHost>) -> Json<Value> {
        host.calls.fetch_add(1, Ordering::SeqCst);
        Json(host.answer.as_ref().clone())
    }

    let production_calls = Arc::new(AtomicUsize::new(0));
    let sandbox_calls = Arc::new(AtomicUsize::new(0));
    let app = Router::new()
        .route(
            "/production/verifyReceipt",
            post(verify).with_state(VerifyReceiptHost {
                answer: Arc::new(production),
                calls: production_calls.clone(),
            }),
        )
        .route(
            "/sandbox/verifyReceipt",
            post(verify).with_state(VerifyReceiptHost {
                answer: Arc::new(sandbox),
                calls: sandbox_calls.clone(),
            }),
        );

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    AppStoreStandIn {
        production_url: Url::parse(&format!("http://{addr}/production/")).unwrap(),
        sandbox_url: Url::parse(&format!("http://{addr}/sandbox/")).unwrap(),
        production_calls,
        sandbox_calls,
    }
}
