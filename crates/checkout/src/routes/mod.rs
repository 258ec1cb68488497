//! HTTP route handlers for IAP checkout.
//!
//! # Route Structure
//!
//! ```text
//! GET  /health                        - Health check
//!
//! # Mobile IAP API (requires `Authorization: Bearer <token>`)
//! GET  /api/iap/v1/basket/add/        - Fill the open basket from `sku` params
//! POST /api/iap/v1/checkout/          - Freeze a basket for a payment processor
//! POST /api/iap/v1/execute/           - Submit a store receipt, place the order
//! ```

pub mod basket;
pub mod checkout;
pub mod execute;

use std::time::Duration;

use axum::{
    Router,
    http::{Request, Response},
    middleware::from_fn,
    routing::{get, post},
};
use tower_http::trace::{DefaultOnResponse, OnResponse, TraceLayer};
use tracing::Span;

use crate::middleware::request_id_middleware;
use crate::state::AppState;

/// Prefix every mobile endpoint is mounted under.
pub const API_PREFIX: &str = "/api/iap/v1";

/// Path of the execute endpoint, as handed to clients in `payment_page_url`.
pub const EXECUTE_URL_PATH: &str = "/api/iap/v1/execute/";

/// Create the mobile API routes router.
pub fn api_routes() -> Router<AppState> {
    Router::new()
        .route("/basket/add/", get(basket::add))
        .route("/checkout/", post(checkout::checkout))
        .route("/execute/", post(execute::execute))
}

/// Create the full application router.
pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .nest(API_PREFIX, api_routes())
        .layer(from_fn(request_id_middleware))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(|request: &Request<_>| {
                    tracing::info_span!(
                        "http_request",
                        method = %request.method(),
                        uri = %request.uri(),
                        request_id = tracing::field::Empty,
                        user_id = tracing::field::Empty,
                        status = tracing::field::Empty,
                        latency_ms = tracing::field::Empty,
                    )
                })
                .on_response(|response: &Response<_>, latency: Duration, span: &Span| {
                    span.record("status", response.status().as_u16());
                    span.record(
                        "latency_ms",
                        u64::try_from(latency.as_millis()).unwrap_or(u64::MAX),
                    );
                    DefaultOnResponse::default().on_response(response, latency, span);
                }),
        )
        .with_state(state)
}

/// Liveness health check endpoint.
async fn health() -> &'static str {
    "ok"
}
