//! App Store `verifyReceipt` verification.
//!
//! Receipts are posted to the production endpoint first. Production answers
//! `21007` for sandbox receipts (TestFlight, review builds); the validator then
//! repeats the call once against the sandbox when fallback is enabled.

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use secrecy::ExposeSecret;
use serde::Deserialize;
use tracing::{debug, info, instrument};
use url::Url;

use iap_checkout_core::PaymentProcessor;

use super::{PurchaseAttempt, ReceiptValidator, ValidationError, ValidationResult};
use crate::config::AppStoreConfig;

const STATUS_OK: i64 = 0;
const STATUS_MALFORMED: i64 = 21002;
const STATUS_UNAUTHENTIC: i64 = 21003;
const STATUS_BAD_SECRET: i64 = 21004;
const STATUS_UNAVAILABLE: i64 = 21005;
const STATUS_EXPIRED: i64 = 21006;
const STATUS_SANDBOX_RECEIPT: i64 = 21007;
const STATUS_PRODUCTION_RECEIPT: i64 = 21008;
const STATUS_UNAUTHORIZED: i64 = 21010;

#[derive(Debug, Deserialize)]
struct VerifyReceiptResponse {
    status: i64,
    receipt: Option<Receipt>,
}

#[derive(Debug, Deserialize)]
struct Receipt {
    bundle_id: Option<String>,
    #[serde(default)]
    in_app: Vec<InAppPurchase>,
}

#[derive(Debug, Deserialize)]
struct InAppPurchase {
    product_id: String,
    transaction_id: String,
    cancellation_date: Option<String>,
}

/// Which `verifyReceipt` host a call went to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Environment {
    Production,
    Sandbox,
}

/// What to do with one `verifyReceipt` answer.
#[derive(Debug, PartialEq)]
enum Verdict {
    Done(Result<ValidationResult, ValidationError>),
    Redirect(Environment),
}

/// Validator for `ios-iap`.
pub struct AppStoreValidator {
    client: reqwest::Client,
    config: AppStoreConfig,
}

impl AppStoreValidator {
    /// Create a validator sharing an HTTP client.
    #[must_use]
    pub const fn new(client: reqwest::Client, config: AppStoreConfig) -> Self {
        Self { client, config }
    }

    fn endpoint(&self, environment: Environment) -> Result<Url, ValidationError> {
        let base = match environment {
            Environment::Production => &self.config.production_url,
            Environment::Sandbox => &self.config.sandbox_url,
        };
        base.join("verifyReceipt")
            .map_err(|e| ValidationError::Misconfigured(format!("bad verifyReceipt URL: {e}")))
    }

    async fn verify(
        &self,
        environment: Environment,
        receipt: &str,
    ) -> Result<serde_json::Value, ValidationError> {
        let body = serde_json::json!({
            "receipt-data": receipt,
            "password": self.config.shared_secret.expose_secret(),
            "exclude-old-transactions": true,
        });

        let response = self
            .client
            .post(self.endpoint(environment)?)
            .json(&body)
            .send()
            .await
            .map_err(|e| ValidationError::Transient(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ValidationError::Transient(format!(
                "App Store answered {status}"
            )));
        }

        response
            .json()
            .await
            .map_err(|e| ValidationError::Transient(format!("unreadable App Store response: {e}")))
    }
}

#[async_trait]
impl ReceiptValidator for AppStoreValidator {
    fn processor(&self) -> PaymentProcessor {
        PaymentProcessor::IosIap
    }

    #[instrument(skip(self, attempt), fields(basket_id = %attempt.basket_id, product_id = %attempt.product_id))]
    async fn validate(
        &self,
        attempt: &PurchaseAttempt,
    ) -> Result<ValidationResult, ValidationError> {
        check_receipt_encoding(&attempt.receipt)?;
        let receipt = attempt.receipt.trim();

        let mut environment = Environment::Production;
        let mut redirected = false;
        loop {
            let raw = self.verify(environment, receipt).await?;
            match interpret(environment, raw, attempt, &self.config.bundle_id) {
                Verdict::Done(result) => return result,
                Verdict::Redirect(next) if !redirected && self.may_redirect(next) => {
                    info!(?next, "Receipt belongs to another App Store environment, retrying");
                    environment = next;
                    redirected = true;
                }
                Verdict::Redirect(next) => {
                    return Err(ValidationError::InvalidReceipt(format!(
                        "receipt belongs to the {next:?} environment"
                    )));
                }
            }
        }
    }
}

impl AppStoreValidator {
    const fn may_redirect(&self, next: Environment) -> bool {
        match next {
            Environment::Sandbox => self.config.sandbox_fallback,
            Environment::Production => true,
        }
    }
}

/// Reject receipts that are not base64 before spending a network call.
fn check_receipt_encoding(receipt: &str) -> Result<(), ValidationError> {
    let receipt = receipt.trim();
    if receipt.is_empty() {
        return Err(ValidationError::InvalidReceipt("receipt is empty".to_string()));
    }
    STANDARD
        .decode(receipt)
        .map(|_| ())
        .map_err(|e| ValidationError::InvalidReceipt(format!("receipt is not base64: {e}")))
}

/// Classify one `verifyReceipt` answer.
fn interpret(
    environment: Environment,
    raw: serde_json::Value,
    attempt: &PurchaseAttempt,
    bundle_id: &str,
) -> Verdict {
    let response: VerifyReceiptResponse = match serde_json::from_value(raw.clone()) {
        Ok(response) => response,
        Err(e) => {
            return Verdict::Done(Err(ValidationError::Transient(format!(
                "unexpected App Store response: {e}"
            ))));
        }
    };
    debug!(status = response.status, ?environment, "App Store responded");

    let failure = match response.status {
        STATUS_OK => return Verdict::Done(match_purchase(response.receipt, raw, attempt, bundle_id)),
        STATUS_SANDBOX_RECEIPT if environment == Environment::Production => {
            return Verdict::Redirect(Environment::Sandbox);
        }
        STATUS_PRODUCTION_RECEIPT if environment == Environment::Sandbox => {
            return Verdict::Redirect(Environment::Production);
        }
        STATUS_EXPIRED => ValidationError::Expired("subscription receipt has expired".to_string()),
        STATUS_UNAVAILABLE | 21100..=21199 => {
            ValidationError::Transient(format!("App Store status {}", response.status))
        }
        STATUS_BAD_SECRET => {
            ValidationError::Misconfigured("shared secret was rejected".to_string())
        }
        STATUS_MALFORMED | STATUS_UNAUTHENTIC | STATUS_UNAUTHORIZED => {
            ValidationError::InvalidReceipt(format!("App Store status {}", response.status))
        }
        other => ValidationError::InvalidReceipt(format!("App Store status {other}")),
    };
    Verdict::Done(Err(failure))
}

/// Find the purchase of the requested product inside a valid receipt.
fn match_purchase(
    receipt: Option<Receipt>,
    raw: serde_json::Value,
    attempt: &PurchaseAttempt,
    bundle_id: &str,
) -> Result<ValidationResult, ValidationError> {
    let receipt =
        receipt.ok_or_else(|| ValidationError::InvalidReceipt("no receipt in response".to_string()))?;

    if receipt.bundle_id.as_deref() != Some(bundle_id) {
        return Err(ValidationError::InvalidReceipt(format!(
            "receipt belongs to bundle {:?}",
            receipt.bundle_id
        )));
    }

    let for_product: Vec<&InAppPurchase> = receipt
        .in_app
        .iter()
        .filter(|purchase| purchase.product_id == attempt.product_id)
        .collect();

    let Some(purchase) = for_product
        .iter()
        .find(|purchase| purchase.transaction_id == attempt.transaction_id)
        .or_else(|| for_product.first())
    else {
        return Err(receipt.in_app.first().map_or_else(
            || ValidationError::InvalidReceipt("receipt contains no purchases".to_string()),
            |other| ValidationError::ProductMismatch {
                expected: attempt.product_id.clone(),
                actual: other.product_id.clone(),
            },
        ));
    };

    if purchase.cancellation_date.is_some() {
        return Err(ValidationError::Expired("purchase was refunded".to_string()));
    }

    Ok(ValidationResult {
        store_order_id: purchase.transaction_id.clone(),
        product_id: purchase.product_id.clone(),
        raw_response: raw,
    })
}
