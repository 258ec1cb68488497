//! Store receipt validation.
//!
//! Google Play and the App Store share one contract, [`ReceiptValidator`],
//! but nothing about their wire formats. Each validator makes exactly one
//! verification call per attempt (plus the App Store's sandbox redirect) and
//! classifies the store's answer into a [`ValidationResult`] or a
//! [`ValidationError`]. Retrying a transient failure is left to the client.

pub mod app_store;
pub mod google_play;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use iap_checkout_core::{BasketId, PaymentProcessor};

use crate::config::ServiceConfig;

pub use app_store::AppStoreValidator;
pub use google_play::GooglePlayValidator;

/// One receipt submission from a mobile client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PurchaseAttempt {
    pub basket_id: BasketId,
    pub processor: PaymentProcessor,
    /// Store transaction id reported by the client.
    pub transaction_id: String,
    /// Store product id the client says it bought.
    pub product_id: String,
    /// Google Play purchase token, or the base64 App Store receipt.
    pub receipt: String,
}

/// A receipt the store confirmed for the requested product.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidationResult {
    /// The store's identifier for the purchase (`orderId` / `transaction_id`).
    pub store_order_id: String,
    pub product_id: String,
    /// Store response, kept with the payment record.
    pub raw_response: serde_json::Value,
}

/// Why a store did not confirm a receipt.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("invalid receipt: {0}")]
    InvalidReceipt(String),

    #[error("purchase expired or cancelled: {0}")]
    Expired(String),

    #[error("purchase was already consumed")]
    AlreadyConsumed,

    #[error("receipt is for product {actual}, expected {expected}")]
    ProductMismatch { expected: String, actual: String },

    /// Network failure or store outage; the client may resubmit.
    #[error("store unavailable: {0}")]
    Transient(String),

    #[error("store verification misconfigured: {0}")]
    Misconfigured(String),
}

/// Verifies a receipt with the store that issued it.
#[async_trait]
pub trait ReceiptValidator: Send + Sync {
    /// Processor this validator serves.
    fn processor(&self) -> PaymentProcessor;

    /// Verify the attempt's receipt against its product.
    async fn validate(
        &self,
        attempt: &PurchaseAttempt,
    ) -> Result<ValidationResult, ValidationError>;
}

/// Errors building the store clients at start-up.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("{0} is enabled but not configured")]
    MissingConfig(PaymentProcessor),
}

/// Enabled processors and their validators.
#[derive(Clone, Default)]
pub struct ProcessorRegistry {
    validators: HashMap<PaymentProcessor, Arc<dyn ReceiptValidator>>,
}

impl ProcessorRegistry {
    /// An empty registry; every processor name is unknown.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Enable the validator's processor.
    #[must_use]
    pub fn with(mut self, validator: Arc<dyn ReceiptValidator>) -> Self {
        self.validators.insert(validator.processor(), validator);
        self
    }

    /// Build the validators for every enabled processor.
    ///
    /// # Errors
    ///
    /// Returns `RegistryError` if an enabled processor has no store
    /// configuration or the HTTP client cannot be built.
    pub fn from_config(config: &ServiceConfig) -> Result<Self, RegistryError> {
        let client = reqwest::Client::builder()
            .timeout(config.store_timeout)
            .build()?;

        let mut registry = Self::new();
        for processor in &config.enabled_processors {
            let validator: Arc<dyn ReceiptValidator> = match processor {
                PaymentProcessor::AndroidIap => {
                    let store = config
                        .google_play
                        .clone()
                        .ok_or(RegistryError::MissingConfig(*processor))?;
                    Arc::new(GooglePlayValidator::new(client.clone(), store))
                }
                PaymentProcessor::IosIap => {
                    let store = config
                        .app_store
                        .clone()
                        .ok_or(RegistryError::MissingConfig(*processor))?;
                    Arc::new(AppStoreValidator::new(client.clone(), store))
                }
            };
            registry = registry.with(validator);
        }
        Ok(registry)
    }

    /// Resolve a client-supplied processor name to an enabled processor.
    #[must_use]
    pub fn resolve(&self, name: &str) -> Option<PaymentProcessor> {
        name.parse::<PaymentProcessor>()
            .ok()
            .filter(|processor| self.validators.contains_key(processor))
    }

    /// Validator for an enabled processor.
    #[must_use]
    pub fn validator(&self, processor: PaymentProcessor) -> Option<Arc<dyn ReceiptValidator>> {
        self.validators.get(&processor).cloned()
    }
}
