//! Google Play Developer API purchase verification.
//!
//! Looks up the `ProductPurchase` resource for the purchase token:
//!
//! ```text
//! GET {api_base}/androidpublisher/v3/applications/{package}/purchases/products/{productId}/tokens/{token}
//! ```

use async_trait::async_trait;
use reqwest::StatusCode;
use secrecy::ExposeSecret;
use serde::Deserialize;
use tracing::{debug, instrument};
use url::Url;

use iap_checkout_core::PaymentProcessor;

use super::{PurchaseAttempt, ReceiptValidator, ValidationError, ValidationResult};
use crate::config::GooglePlayConfig;

/// `purchaseState` values.
const PURCHASED: i64 = 0;
const CANCELED: i64 = 1;
const PENDING: i64 = 2;

/// `consumptionState` value of a consumed purchase.
const CONSUMED: i64 = 1;

/// The fields of a `ProductPurchase` this service reads.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProductPurchase {
    purchase_state: Option<i64>,
    consumption_state: Option<i64>,
    order_id: Option<String>,
    product_id: Option<String>,
}

/// Validator for `android-iap`.
pub struct GooglePlayValidator {
    client: reqwest::Client,
    config: GooglePlayConfig,
}

impl GooglePlayValidator {
    /// Create a validator sharing an HTTP client.
    #[must_use]
    pub const fn new(client: reqwest::Client, config: GooglePlayConfig) -> Self {
        Self { client, config }
    }

    fn purchase_url(&self, attempt: &PurchaseAttempt) -> Result<Url, ValidationError> {
        purchase_url(
            &self.config.api_base_url,
            &self.config.package_name,
            &attempt.product_id,
            &attempt.receipt,
        )
    }
}

#[async_trait]
impl ReceiptValidator for GooglePlayValidator {
    fn processor(&self) -> PaymentProcessor {
        PaymentProcessor::AndroidIap
    }

    #[instrument(skip(self, attempt), fields(basket_id = %attempt.basket_id, product_id = %attempt.product_id))]
    async fn validate(
        &self,
        attempt: &PurchaseAttempt,
    ) -> Result<ValidationResult, ValidationError> {
        if attempt.receipt.trim().is_empty() {
            return Err(ValidationError::InvalidReceipt(
                "purchase token is empty".to_string(),
            ));
        }

        let url = self.purchase_url(attempt)?;
        let response = self
            .client
            .get(url)
            .bearer_auth(self.config.access_token.expose_secret())
            .send()
            .await
            .map_err(|e| ValidationError::Transient(e.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| ValidationError::Transient(e.to_string()))?;
        debug!(status = status.as_u16(), "Google Play responded");

        classify(status, &body, &attempt.product_id)
    }
}

/// Build the `ProductPurchase` URL, percent-encoding every path segment.
fn purchase_url(
    base: &Url,
    package: &str,
    product_id: &str,
    token: &str,
) -> Result<Url, ValidationError> {
    let mut url = base.clone();
    url.path_segments_mut()
        .map_err(|()| {
            ValidationError::Misconfigured(format!("API base URL {base} cannot have a path"))
        })?
        .pop_if_empty()
        .extend([
            "androidpublisher",
            "v3",
            "applications",
            package,
            "purchases",
            "products",
            product_id,
            "tokens",
            token.trim(),
        ]);
    Ok(url)
}

/// Classify a Developer API answer for the requested product.
fn classify(
    status: StatusCode,
    body: &str,
    expected_product: &str,
) -> Result<ValidationResult, ValidationError> {
    match status.as_u16() {
        200..=299 => {}
        400 | 404 | 410 => {
            return Err(ValidationError::InvalidReceipt(format!(
                "Google Play rejected the purchase token ({status})"
            )));
        }
        401 | 403 => {
            return Err(ValidationError::Misconfigured(format!(
                "Google Play refused our credentials ({status})"
            )));
        }
        _ => {
            return Err(ValidationError::Transient(format!(
                "Google Play answered {status}"
            )));
        }
    }

    let raw_response: serde_json::Value = serde_json::from_str(body)
        .map_err(|e| ValidationError::Transient(format!("unreadable Google Play response: {e}")))?;
    let purchase: ProductPurchase = serde_json::from_value(raw_response.clone())
        .map_err(|e| ValidationError::InvalidReceipt(format!("unexpected purchase shape: {e}")))?;

    if let Some(actual) = purchase.product_id.as_deref()
        && actual != expected_product
    {
        return Err(ValidationError::ProductMismatch {
            expected: expected_product.to_string(),
            actual: actual.to_string(),
        });
    }

    match purchase.purchase_state {
        Some(PURCHASED) => {}
        Some(CANCELED) => {
            return Err(ValidationError::Expired("purchase was cancelled".to_string()));
        }
        Some(PENDING) => {
            return Err(ValidationError::InvalidReceipt(
                "purchase is still pending".to_string(),
            ));
        }
        other => {
            return Err(ValidationError::InvalidReceipt(format!(
                "unknown purchase state {other:?}"
            )));
        }
    }

    if purchase.consumption_state == Some(CONSUMED) {
        return Err(ValidationError::AlreadyConsumed);
    }

    let store_order_id = purchase
        .order_id
        .filter(|id| !id.is_empty())
        .ok_or_else(|| ValidationError::InvalidReceipt("purchase has no orderId".to_string()))?;

    Ok(ValidationResult {
        store_order_id,
        product_id: expected_product.to_string(),
        raw_response,
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    const PRODUCT: &str = "org.example.course.verified";

    fn purchase(state: i64, consumption: i64) -> String {
        serde_json::json!({
            "kind": "androidpublisher#productPurchase",
            "purchaseTimeMillis": "1700000000000",
            "purchaseState": state,
            "consumptionState": consumption,
            "orderId": "GPA.3345-1234-5678-90123",
            "productId": PRODUCT,
            "acknowledgementState": 0
        })
        .to_string()
    }

    #[test]
    fn test_purchased_is_valid() {
        let result = classify(StatusCode::OK, &purchase(0, 0), PRODUCT).unwrap();
        assert_eq!(result.store_order_id, "GPA.3345-1234-5678-90123");
        assert_eq!(result.product_id, PRODUCT);
        assert_eq!(result.raw_response["kind"], "androidpublisher#productPurchase");
    }

    #[test]
    fn test_purchase_states() {
        assert!(matches!(
            classify(StatusCode::OK, &purchase(1, 0), PRODUCT),
            Err(ValidationError::Expired(_))
        ));
        assert!(matches!(
            classify(StatusCode::OK, &purchase(2, 0), PRODUCT),
            Err(ValidationError::InvalidReceipt(_))
        ));
        assert_eq!(
            classify(StatusCode::OK, &purchase(0, 1), PRODUCT),
            Err(ValidationError::AlreadyConsumed)
        );
    }

    #[test]
    fn test_other_product_is_mismatch() {
        let err = classify(StatusCode::OK, &purchase(0, 0), "org.example.other").unwrap_err();
        assert_eq!(
            err,
            ValidationError::ProductMismatch {
                expected: "org.example.other".to_string(),
                actual: PRODUCT.to_string(),
            }
        );
    }

    #[test]
    fn test_http_status_classification() {
        assert!(matches!(
            classify(StatusCode::NOT_FOUND, "{}", PRODUCT),
            Err(ValidationError::InvalidReceipt(_))
        ));
        assert!(matches!(
            classify(StatusCode::UNAUTHORIZED, "{}", PRODUCT),
            Err(ValidationError::Misconfigured(_))
        ));
        assert!(matches!(
            classify(StatusCode::TOO_MANY_REQUESTS, "", PRODUCT),
            Err(ValidationError::Transient(_))
        ));
        assert!(matches!(
            classify(StatusCode::SERVICE_UNAVAILABLE, "", PRODUCT),
            Err(ValidationError::Transient(_))
        ));
    }

    #[test]
    fn test_missing_order_id_is_invalid() {
        let body = serde_json::json!({ "purchaseState": 0, "consumptionState": 0 }).to_string();
        assert!(matches!(
            classify(StatusCode::OK, &body, PRODUCT),
            Err(ValidationError::InvalidReceipt(_))
        ));
    }

    #[test]
    fn test_purchase_url_encodes_segments() {
        let base = Url::parse("https://androidpublisher.googleapis.com/").unwrap();
        let url = purchase_url(&base, "org.example.app", PRODUCT, "tok/en with space").unwrap();
        assert_eq!(
            url.as_str(),
            "https://androidpublisher.googleapis.com/androidpublisher/v3/applications/org.example.app/purchases/products/org.example.course.verified/tokens/tok%2Fen%20with%20space"
        );
    }
}
