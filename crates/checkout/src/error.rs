//! Client-facing error catalog with Sentry integration.
//!
//! Every failure a handler can report is one [`IapError`] variant. The
//! variant decides the HTTP status and the stable message rendered as
//! `{"error": "<message>"}`; internal detail never reaches the client.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;

use iap_checkout_core::Email;

use crate::db::RepositoryError;

/// Error returned by the checkout endpoints.
#[derive(Debug, Error)]
pub enum IapError {
    #[error("Basket [{id}] not found.")]
    BasketNotFound { id: String },

    #[error("Basket id is not provided")]
    BasketIdMissing,

    #[error("You have already purchased these products")]
    AlreadyPurchased,

    #[error("No product is available to buy.")]
    NoProductAvailable,

    #[error("No SKUs provided.")]
    NoSkusProvided,

    /// `skus` is the requested SKU list joined with `", "`.
    #[error("Products with SKU(s) [{skus}] do not exist.")]
    ProductsDoNotExist { skus: String },

    #[error("An error occurred during payment handling.")]
    PaymentHandlingError,

    #[error("An error occurred during order creation.")]
    OrderCreationError,

    /// Rendered with `200 OK`: the order exists even though a hook failed.
    #[error("An error occurred during post order operations.")]
    PostOrderOperationError,

    #[error("The course has already been paid for on this device by the associated Apple ID.")]
    AlreadyPaidOnDevice,

    #[error("An unexpected exception occurred while obtaining basket for user [{user}].")]
    UnexpectedBasketError { user: Email },

    #[error("Payment processor [{name}] not found.")]
    UnknownPaymentProcessor { name: String },

    #[error("Authentication credentials were not provided.")]
    Unauthenticated,

    #[error("Invalid request payload: {0}")]
    InvalidPayload(String),

    /// Storage failed outside the purchase flow (add-to-basket, checkout).
    #[error("Storage error: {0}")]
    Storage(#[from] RepositoryError),
}

/// JSON body of every error response.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: String,
}

impl IapError {
    /// HTTP status the error is rendered with.
    #[must_use]
    pub const fn status(&self) -> StatusCode {
        match self {
            Self::AlreadyPurchased => StatusCode::NOT_ACCEPTABLE,
            Self::AlreadyPaidOnDevice => StatusCode::CONFLICT,
            Self::PostOrderOperationError => StatusCode::OK,
            Self::Unauthenticated => StatusCode::UNAUTHORIZED,
            Self::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::BasketNotFound { .. }
            | Self::BasketIdMissing
            | Self::NoProductAvailable
            | Self::NoSkusProvided
            | Self::ProductsDoNotExist { .. }
            | Self::PaymentHandlingError
            | Self::OrderCreationError
            | Self::UnexpectedBasketError { .. }
            | Self::UnknownPaymentProcessor { .. }
            | Self::InvalidPayload(_) => StatusCode::BAD_REQUEST,
        }
    }

    /// Message shown to the client.
    #[must_use]
    pub fn client_message(&self) -> String {
        match self {
            // Don't expose storage details to clients
            Self::Storage(_) => "Internal server error".to_string(),
            _ => self.to_string(),
        }
    }
}

impl IntoResponse for IapError {
    fn into_response(self) -> Response {
        if matches!(self, Self::Storage(_)) {
            let event_id = sentry::capture_error(&self);
            tracing::error!(
                error = %self,
                sentry_event_id = %event_id,
                "Request error"
            );
        }

        let body = ErrorBody {
            error: self.client_message(),
        };
        (self.status(), Json(body)).into_response()
    }
}

/// Result type alias for `IapError`.
pub type Result<T> = std::result::Result<T, IapError>;

/// Set the Sentry user context for the authenticated purchaser.
pub fn set_sentry_user(user_id: &impl ToString, email: Option<&str>) {
    sentry::configure_scope(|scope| {
        scope.set_user(Some(sentry::User {
            id: Some(user_id.to_string()),
            email: email.map(String::from),
            ..Default::default()
        }));
    });
}
