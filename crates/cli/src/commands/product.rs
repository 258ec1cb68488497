//! Catalog commands.
//!
//! # Usage
//!
//! ```bash
//! # Add or update a single product
//! iap-cli product add -s 8CF08E5 -t "Verified seat" -p 49.00 -c USD
//!
//! # Import products from a YAML file
//! iap-cli product import catalog.yaml
//! ```
//!
//! # File Format
//!
//! ```yaml
//! - sku: 8CF08E5
//!   title: Verified seat
//!   price: "49.00"
//!   currency: USD
//!   expires: 2027-06-30T00:00:00Z   # optional
//!   is_active: true                  # optional, defaults to true
//! ```

use std::collections::HashSet;
use std::path::Path;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Deserialize;
use thiserror::Error;

use iap_checkout_core::CurrencyCode;

use super::{EnvError, database_url};

/// Errors that can occur during catalog operations.
#[derive(Debug, Error)]
pub enum ProductError {
    #[error(transparent)]
    Env(#[from] EnvError),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Failed to read {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },

    #[error("Invalid catalog file: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("{0} validation errors found")]
    Invalid(usize),

    #[error("Invalid currency: {0}")]
    InvalidCurrency(String),
}

/// One catalog entry.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ProductSeed {
    pub sku: String,
    pub title: String,
    pub price: Decimal,
    pub currency: CurrencyCode,
    #[serde(default = "default_active")]
    pub is_active: bool,
    #[serde(default)]
    pub expires: Option<DateTime<Utc>>,
}

const fn default_active() -> bool {
    true
}

/// Add or update one product.
///
/// # Errors
///
/// Returns `ProductError` if the entry is invalid or the database is
/// unreachable.
pub async fn add(sku: &str, title: &str, price: Decimal, currency: &str) -> Result<(), ProductError> {
    let seed = ProductSeed {
        sku: sku.to_owned(),
        title: title.to_owned(),
        price,
        currency: currency
            .parse()
            .map_err(|_| ProductError::InvalidCurrency(currency.to_owned()))?,
        is_active: true,
        expires: None,
    };
    upsert_all(&[seed]).await
}

/// Import every product in a YAML file.
///
/// The whole file is validated before anything is written.
///
/// # Errors
///
/// Returns `ProductError` if the file cannot be read or parsed, any entry is
/// invalid, or the database is unreachable.
pub async fn import(file_path: &str) -> Result<(), ProductError> {
    let path = Path::new(file_path);
    tracing::info!(path = %file_path, "Loading catalog from file");

    let content = tokio::fs::read_to_string(path)
        .await
        .map_err(|source| ProductError::Read {
            path: file_path.to_owned(),
            source,
        })?;
    let seeds: Vec<ProductSeed> = serde_yaml::from_str(&content)?;
    tracing::info!(products = seeds.len(), "Parsed catalog");

    upsert_all(&seeds).await
}

async fn upsert_all(seeds: &[ProductSeed]) -> Result<(), ProductError> {
    let errors = validate(seeds);
    if !errors.is_empty() {
        tracing::error!("Catalog validation failed:");
        for err in &errors {
            tracing::error!("  - {err}");
        }
        return Err(ProductError::Invalid(errors.len()));
    }

    let pool = iap_checkout::db::create_pool(&database_url()?).await?;

    let mut tx = pool.begin().await?;
    for seed in seeds {
        sqlx::query(
            r"
            INSERT INTO iap.product (sku, title, price, currency, is_active, expires)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (sku) DO UPDATE
            SET title = EXCLUDED.title,
                price = EXCLUDED.price,
                currency = EXCLUDED.currency,
                is_active = EXCLUDED.is_active,
                expires = EXCLUDED.expires
            ",
        )
        .bind(&seed.sku)
        .bind(&seed.title)
        .bind(seed.price)
        .bind(seed.currency.as_str())
        .bind(seed.is_active)
        .bind(seed.expires)
        .execute(&mut *tx)
        .await?;
    }
    tx.commit().await?;

    tracing::info!("Catalog updated: {} product(s)", seeds.len());
    Ok(())
}

/// Problems with a batch of catalog entries, one message per problem.
fn validate(seeds: &[ProductSeed]) -> Vec<String> {
    let mut errors = Vec::new();
    let mut seen = HashSet::new();

    for seed in seeds {
        let sku = seed.sku.trim();
        if sku.is_empty() {
            errors.push(format!("product '{}' has an empty SKU", seed.title));
            continue;
        }
        if !seen.insert(sku) {
            errors.push(format!("SKU {sku} appears more than once"));
        }
        if seed.title.trim().is_empty() {
            errors.push(format!("SKU {sku} has an empty title"));
        }
        if seed.price.is_sign_negative() {
            errors.push(format!("SKU {sku} has a negative price"));
        }
    }

    errors
}
