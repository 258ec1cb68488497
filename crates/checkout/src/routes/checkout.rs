//! Checkout handler.

use axum::{
    Json,
    extract::{State, rejection::JsonRejection},
};
use serde::Deserialize;
use tracing::instrument;

use crate::error::{IapError, Result};
use crate::middleware::RequireUser;
use crate::services::{BasketRef, CheckoutResponse};
use crate::state::AppState;

/// Body of `POST /checkout/`.
#[derive(Debug, Deserialize)]
pub struct CheckoutRequest {
    #[serde(default)]
    pub basket_id: Option<BasketRef>,
    #[serde(default)]
    pub payment_processor: Option<String>,
}

/// `POST /checkout/`
#[instrument(skip_all)]
pub async fn checkout(
    State(state): State<AppState>,
    RequireUser(user): RequireUser,
    payload: std::result::Result<Json<CheckoutRequest>, JsonRejection>,
) -> Result<Json<CheckoutResponse>> {
    let Json(request) = payload.map_err(|e| IapError::InvalidPayload(e.body_text()))?;

    let response = state
        .checkout()
        .start(
            &user,
            request.basket_id.as_ref(),
            request.payment_processor.as_deref(),
        )
        .await?;
    Ok(Json(response))
}
