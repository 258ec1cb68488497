//! Add-to-basket handler.

use axum::{
    Json,
    extract::{Query, State},
};
use tracing::instrument;

use crate::config::parse_bool;
use crate::error::Result;
use crate::middleware::RequireUser;
use crate::services::BasketSummary;
use crate::state::AppState;

/// `GET /basket/add/?sku=A&sku=B&email_opt_in=true`
///
/// Repeated `sku` parameters are collected in order. `email_opt_in` is
/// `false` unless it parses as true.
#[instrument(skip_all)]
pub async fn add(
    State(state): State<AppState>,
    RequireUser(user): RequireUser,
    Query(params): Query<Vec<(String, String)>>,
) -> Result<Json<BasketSummary>> {
    let mut skus = Vec::new();
    let mut email_opt_in = false;
    for (key, value) in params {
        match key.as_str() {
            "sku" => skus.push(value),
            "email_opt_in" => email_opt_in = parse_bool(&value).unwrap_or(false),
            _ => {}
        }
    }

    let summary = state
        .add_to_basket()
        .add(&user, skus, email_opt_in)
        .await?;
    Ok(Json(summary))
}
