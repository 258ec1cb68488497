//! Purchase execution handler.

use axum::{
    Json,
    extract::{State, rejection::JsonRejection},
};
use serde::{Deserialize, Serialize};
use tracing::{Instrument, instrument};

use crate::error::{IapError, Result};
use crate::middleware::RequireUser;
use crate::models::OrderData;
use crate::services::{BasketRef, ExecuteRequest};
use crate::state::AppState;

/// Body of `POST /execute/`, as Android and iOS clients send it.
///
/// iOS clients put the base64 receipt in `purchaseToken` (or `receipt`).
#[derive(Debug, Deserialize)]
pub struct ExecutePayload {
    #[serde(default)]
    pub basket_id: Option<BasketRef>,
    #[serde(default)]
    pub payment_processor: String,
    #[serde(default, rename = "transactionId")]
    pub transaction_id: String,
    #[serde(default, rename = "productId")]
    pub product_id: String,
    #[serde(default, rename = "purchaseToken", alias = "receipt")]
    pub purchase_token: String,
}

impl From<ExecutePayload> for ExecuteRequest {
    fn from(payload: ExecutePayload) -> Self {
        Self {
            basket_id: payload.basket_id,
            payment_processor: payload.payment_processor.trim().to_string(),
            transaction_id: payload.transaction_id,
            product_id: payload.product_id,
            receipt: payload.purchase_token,
        }
    }
}

/// Successful execute response.
#[derive(Debug, Serialize)]
pub struct ExecuteResponse {
    pub order_data: OrderData,
}

/// `POST /execute/`
///
/// The purchase runs on its own task so a client disconnect never abandons a
/// payment halfway through order placement.
#[instrument(skip_all)]
pub async fn execute(
    State(state): State<AppState>,
    RequireUser(user): RequireUser,
    payload: std::result::Result<Json<ExecutePayload>, JsonRejection>,
) -> Result<Json<ExecuteResponse>> {
    let Json(payload) = payload.map_err(|e| IapError::InvalidPayload(e.body_text()))?;

    let coordinator = state.coordinator().clone();
    let request = ExecuteRequest::from(payload);
    let task = tokio::spawn(
        async move { coordinator.execute(&user, request).await }.in_current_span(),
    );

    match task.await {
        Ok(outcome) => Ok(Json(ExecuteResponse {
            order_data: outcome?,
        })),
        Err(e) => {
            tracing::error!(error = %e, "Purchase task did not complete");
            Err(IapError::PaymentHandlingError)
        }
    }
}
