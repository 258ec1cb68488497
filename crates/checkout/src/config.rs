//! Checkout service configuration loaded from environment variables.
//!
//! # Environment Variables
//!
//! ## Required
//! - `IAP_DATABASE_URL` - `PostgreSQL` connection string (falls back to `DATABASE_URL`)
//! - `IAP_BASE_URL` - Public URL the mobile apps reach the service on
//!
//! ## Optional
//! - `IAP_HOST` - Bind address (default: 127.0.0.1)
//! - `IAP_PORT` - Listen port (default: 3000)
//! - `IAP_SITE_ID` - Site baskets are opened on (default: 1)
//! - `IAP_ORDER_NUMBER_PREFIX` - Order number prefix (default: IAP)
//! - `IAP_ENABLED_PROCESSORS` - Comma-separated processors (default: android-iap,ios-iap)
//! - `IAP_STORE_TIMEOUT_SECS` - Store verification timeout (default: 10)
//! - `IAP_FULFILLMENT_WEBHOOK_URL` - Endpoint notified after each placed order
//! - `SENTRY_DSN` - Sentry error tracking DSN
//! - `SENTRY_ENVIRONMENT` - Sentry environment name
//!
//! ## Google Play (required when `android-iap` is enabled)
//! - `GOOGLE_PLAY_PACKAGE_NAME` - Application package name
//! - `GOOGLE_PLAY_ACCESS_TOKEN` - OAuth access token for the Developer API
//! - `GOOGLE_PLAY_API_BASE_URL` - API root (default: <https://androidpublisher.googleapis.com>)
//!
//! ## App Store (required when `ios-iap` is enabled)
//! - `APP_STORE_BUNDLE_ID` - Bundle identifier receipts must carry
//! - `APP_STORE_SHARED_SECRET` - App-specific shared secret (high entropy)
//! - `APP_STORE_SANDBOX_FALLBACK` - Retry sandbox on status 21007 (default: true)
//! - `APP_STORE_PRODUCTION_URL` - (default: <https://buy.itunes.apple.com>)
//! - `APP_STORE_SANDBOX_URL` - (default: <https://sandbox.itunes.apple.com>)

use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use secrecy::SecretString;
use thiserror::Error;
use url::Url;

use iap_checkout_core::{PaymentProcessor, SiteId};

const MIN_ENTROPY_BITS_PER_CHAR: f64 = 3.3;

const DEFAULT_GOOGLE_PLAY_API: &str = "https://androidpublisher.googleapis.com";
const DEFAULT_APP_STORE_PRODUCTION: &str = "https://buy.itunes.apple.com";
const DEFAULT_APP_STORE_SANDBOX: &str = "https://sandbox.itunes.apple.com";

/// Blocklist of common placeholder patterns (case-insensitive)
const PLACEHOLDER_PATTERNS: &[&str] = &[
    "your-",
    "changeme",
    "replace",
    "placeholder",
    "example",
    "secret",
    "password",
    "xxx",
    "todo",
    "fixme",
    "insert",
    "enter-",
    "put-your",
    "add-your",
];

/// Configuration errors that can occur during loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingEnvVar(String),
    #[error("Invalid environment variable {0}: {1}")]
    InvalidEnvVar(String, String),
    #[error("Insecure secret in {0}: {1}")]
    InsecureSecret(String, String),
}

/// Checkout service configuration.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// `PostgreSQL` database connection URL (contains password)
    pub database_url: SecretString,
    /// IP address to bind the server to
    pub host: IpAddr,
    /// Port to listen on
    pub port: u16,
    /// Checkout behaviour shared with the request handlers
    pub checkout: CheckoutSettings,
    /// Enabled payment processors
    pub enabled_processors: Vec<PaymentProcessor>,
    /// Timeout applied to every store verification call
    pub store_timeout: Duration,
    /// Endpoint notified after each placed order
    pub fulfillment_webhook_url: Option<Url>,
    /// Google Play Developer API settings
    pub google_play: Option<GooglePlayConfig>,
    /// App Store receipt verification settings
    pub app_store: Option<AppStoreConfig>,
    /// Sentry DSN for error tracking
    pub sentry_dsn: Option<String>,
    /// Sentry environment name
    pub sentry_environment: Option<String>,
}

/// Settings the checkout flow reads on every request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckoutSettings {
    /// Public base URL used to build payment page URLs
    pub base_url: String,
    /// Site baskets are opened on
    pub site_id: SiteId,
    /// Prefix of allocated order numbers
    pub order_number_prefix: String,
}

impl CheckoutSettings {
    /// Base URL without a trailing slash.
    #[must_use]
    pub fn base_url(&self) -> &str {
        self.base_url.trim_end_matches('/')
    }
}

/// Google Play Developer API configuration.
///
/// Implements `Debug` manually to redact secret fields.
#[derive(Clone)]
pub struct GooglePlayConfig {
    /// Android application package name
    pub package_name: String,
    /// OAuth access token with the `androidpublisher` scope
    pub access_token: SecretString,
    /// API root, overridable for tests and proxies
    pub api_base_url: Url,
}

impl std::fmt::Debug for GooglePlayConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GooglePlayConfig")
            .field("package_name", &self.package_name)
            .field("access_token", &"[REDACTED]")
            .field("api_base_url", &self.api_base_url.as_str())
            .finish()
    }
}

/// App Store `verifyReceipt` configuration.
///
/// Implements `Debug` manually to redact secret fields.
#[derive(Clone)]
pub struct AppStoreConfig {
    /// Bundle identifier that receipts must belong to
    pub bundle_id: String,
    /// App-specific shared secret sent as `password`
    pub shared_secret: SecretString,
    /// Retry against the sandbox when production reports a sandbox receipt
    pub sandbox_fallback: bool,
    /// Production verification host
    pub production_url: Url,
    /// Sandbox verification host
    pub sandbox_url: Url,
}

impl std::fmt::Debug for AppStoreConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppStoreConfig")
            .field("bundle_id", &self.bundle_id)
            .field("shared_secret", &"[REDACTED]")
            .field("sandbox_fallback", &self.sandbox_fallback)
            .field("production_url", &self.production_url.as_str())
            .field("sandbox_url", &self.sandbox_url.as_str())
            .finish()
    }
}

impl ServiceConfig {
    /// Load configuration from environment variables.
    ///
    /// Calls `dotenvy::dotenv()` to load from `.env` file if present.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if required variables are missing, invalid, or
    /// if secrets fail validation (placeholder detection, entropy check).
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();

        let database_url = get_database_url("IAP_DATABASE_URL")?;
        let host = get_env_or_default("IAP_HOST", "127.0.0.1")
            .parse::<IpAddr>()
            .map_err(|e| ConfigError::InvalidEnvVar("IAP_HOST".to_string(), e.to_string()))?;
        let port = get_env_or_default("IAP_PORT", "3000")
            .parse::<u16>()
            .map_err(|e| ConfigError::InvalidEnvVar("IAP_PORT".to_string(), e.to_string()))?;

        let base_url = get_required_env("IAP_BASE_URL")?;
        Url::parse(&base_url)
            .map_err(|e| ConfigError::InvalidEnvVar("IAP_BASE_URL".to_string(), e.to_string()))?;
        let site_id = get_env_or_default("IAP_SITE_ID", "1")
            .parse::<SiteId>()
            .map_err(|e| ConfigError::InvalidEnvVar("IAP_SITE_ID".to_string(), e.to_string()))?;
        let checkout = CheckoutSettings {
            base_url,
            site_id,
            order_number_prefix: get_env_or_default("IAP_ORDER_NUMBER_PREFIX", "IAP"),
        };

        let enabled_processors = parse_processors(&get_env_or_default(
            "IAP_ENABLED_PROCESSORS",
            "android-iap,ios-iap",
        ))
        .map_err(|e| ConfigError::InvalidEnvVar("IAP_ENABLED_PROCESSORS".to_string(), e))?;

        let timeout_secs = get_env_or_default("IAP_STORE_TIMEOUT_SECS", "10")
            .parse::<u64>()
            .map_err(|e| {
                ConfigError::InvalidEnvVar("IAP_STORE_TIMEOUT_SECS".to_string(), e.to_string())
            })?;

        let fulfillment_webhook_url = get_optional_env("IAP_FULFILLMENT_WEBHOOK_URL")
            .map(|raw| get_url("IAP_FULFILLMENT_WEBHOOK_URL", &raw))
            .transpose()?;

        let google_play = if enabled_processors.contains(&PaymentProcessor::AndroidIap) {
            Some(GooglePlayConfig::from_env()?)
        } else {
            None
        };
        let app_store = if enabled_processors.contains(&PaymentProcessor::IosIap) {
            Some(AppStoreConfig::from_env()?)
        } else {
            None
        };

        Ok(Self {
            database_url,
            host,
            port,
            checkout,
            enabled_processors,
            store_timeout: Duration::from_secs(timeout_secs),
            fulfillment_webhook_url,
            google_play,
            app_store,
            sentry_dsn: get_optional_env("SENTRY_DSN"),
            sentry_environment: get_optional_env("SENTRY_ENVIRONMENT"),
        })
    }

    /// Returns the socket address for binding the server.
    #[must_use]
    pub const fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }
}

impl GooglePlayConfig {
    fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            package_name: get_required_env("GOOGLE_PLAY_PACKAGE_NAME")?,
            access_token: get_required_secret("GOOGLE_PLAY_ACCESS_TOKEN")?,
            api_base_url: get_url(
                "GOOGLE_PLAY_API_BASE_URL",
                &get_env_or_default("GOOGLE_PLAY_API_BASE_URL", DEFAULT_GOOGLE_PLAY_API),
            )?,
        })
    }
}

impl AppStoreConfig {
    fn from_env() -> Result<Self, ConfigError> {
        let sandbox_fallback = parse_bool(&get_env_or_default("APP_STORE_SANDBOX_FALLBACK", "true"))
            .ok_or_else(|| {
                ConfigError::InvalidEnvVar(
                    "APP_STORE_SANDBOX_FALLBACK".to_string(),
                    "expected true or false".to_string(),
                )
            })?;

        Ok(Self {
            bundle_id: get_required_env("APP_STORE_BUNDLE_ID")?,
            shared_secret: get_validated_secret("APP_STORE_SHARED_SECRET")?,
            sandbox_fallback,
            production_url: get_url(
                "APP_STORE_PRODUCTION_URL",
                &get_env_or_default("APP_STORE_PRODUCTION_URL", DEFAULT_APP_STORE_PRODUCTION),
            )?,
            sandbox_url: get_url(
                "APP_STORE_SANDBOX_URL",
                &get_env_or_default("APP_STORE_SANDBOX_URL", DEFAULT_APP_STORE_SANDBOX),
            )?,
        })
    }
}

// =============================================================================
// Helper Functions
// =============================================================================

/// Get a required environment variable.
fn get_required_env(key: &str) -> Result<String, ConfigError> {
    std::env::var(key).map_err(|_| ConfigError::MissingEnvVar(key.to_string()))
}

/// Get a required environment variable as a secret.
fn get_required_secret(key: &str) -> Result<SecretString, ConfigError> {
    let value = get_required_env(key)?;
    Ok(SecretString::from(value))
}

/// Get database URL with fallback to generic `DATABASE_URL`.
fn get_database_url(primary_key: &str) -> Result<SecretString, ConfigError> {
    if let Ok(value) = std::env::var(primary_key) {
        return Ok(SecretString::from(value));
    }
    if let Ok(value) = std::env::var("DATABASE_URL") {
        return Ok(SecretString::from(value));
    }
    Err(ConfigError::MissingEnvVar(primary_key.to_string()))
}

/// Get an optional environment variable.
fn get_optional_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|value| !value.trim().is_empty())
}

/// Get an environment variable with a default value.
fn get_env_or_default(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn get_url(key: &str, raw: &str) -> Result<Url, ConfigError> {
    Url::parse(raw).map_err(|e| ConfigError::InvalidEnvVar(key.to_string(), e.to_string()))
}

/// Parse a comma-separated processor list, ignoring blanks and duplicates.
fn parse_processors(raw: &str) -> Result<Vec<PaymentProcessor>, String> {
    let mut processors = Vec::new();
    for name in raw.split(',').map(str::trim).filter(|name| !name.is_empty()) {
        let processor = name
            .parse::<PaymentProcessor>()
            .map_err(|e| e.to_string())?;
        if !processors.contains(&processor) {
            processors.push(processor);
        }
    }
    if processors.is_empty() {
        return Err("at least one payment processor must be enabled".to_string());
    }
    Ok(processors)
}

pub(crate) fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" => Some(true),
        "false" | "0" | "no" => Some(false),
        _ => None,
    }
}

/// Calculate Shannon entropy in bits per character.
fn shannon_entropy(s: &str) -> f64 {
    if s.is_empty() {
        return 0.0;
    }

    let mut freq: HashMap<char, usize> = HashMap::new();
    for c in s.chars() {
        *freq.entry(c).or_insert(0) += 1;
    }

    #[allow(clippy::cast_precision_loss)] // String length will never exceed f64 precision
    let len = s.len() as f64;
    freq.values()
        .map(|&count| {
            #[allow(clippy::cast_precision_loss)] // Character count will never exceed f64 precision
            let p = count as f64 / len;
            -p * p.log2()
        })
        .sum()
}

/// Validate that a secret is not a placeholder and has sufficient entropy.
fn validate_secret_strength(secret: &str, var_name: &str) -> Result<(), ConfigError> {
    let lower = secret.to_lowercase();

    for pattern in PLACEHOLDER_PATTERNS {
        if lower.contains(pattern) {
            return Err(ConfigError::InsecureSecret(
                var_name.to_string(),
                format!("appears to be a placeholder (contains '{pattern}')"),
            ));
        }
    }

    // App Store shared secrets are 32 hex characters, comfortably above this
    let entropy = shannon_entropy(secret);
    if entropy < MIN_ENTROPY_BITS_PER_CHAR {
        return Err(ConfigError::InsecureSecret(
            var_name.to_string(),
            format!(
                "entropy too low ({entropy:.2} bits/char, need >= {MIN_ENTROPY_BITS_PER_CHAR:.1}). Use the value issued by the store."
            ),
        ));
    }

    Ok(())
}

/// Load and validate a secret from environment.
fn get_validated_secret(key: &str) -> Result<SecretString, ConfigError> {
    let value = get_required_env(key)?;
    validate_secret_strength(&value, key)?;
    Ok(SecretString::from(value))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_shannon_entropy_empty() {
        assert!((shannon_entropy("") - 0.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_shannon_entropy_two_chars() {
        let entropy = shannon_entropy("ab");
        assert!((entropy - 1.0).abs() < 0.01);
    }

    #[test]
    fn test_validate_secret_strength_placeholder() {
        let result = validate_secret_strength("your-shared-secret", "TEST_VAR");
        assert!(matches!(result, Err(ConfigError::InsecureSecret(_, _))));
    }

    #[test]
    fn test_validate_secret_strength_low_entropy() {
        let result = validate_secret_strength("aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa", "TEST_VAR");
        assert!(matches!(result, Err(ConfigError::InsecureSecret(_, _))));
    }

    #[test]
    fn test_validate_secret_strength_store_issued() {
        let result = validate_secret_strength("9f3b2c7d1e8a4f60b5c9d2e7a1f3b8c4", "TEST_VAR");
        assert!(result.is_ok());
    }

    #[test]
    fn test_parse_processors() {
        assert_eq!(
            parse_processors("android-iap, ios-iap,android-iap").unwrap(),
            vec![PaymentProcessor::AndroidIap, PaymentProcessor::IosIap]
        );
        assert_eq!(
            parse_processors("ios-iap").unwrap(),
            vec![PaymentProcessor::IosIap]
        );
        assert!(parse_processors("paypal").is_err());
        assert!(parse_processors(" , ").is_err());
    }

    #[test]
    fn test_parse_bool() {
        assert_eq!(parse_bool("TRUE"), Some(true));
        assert_eq!(parse_bool("0"), Some(false));
        assert_eq!(parse_bool("maybe"), None);
    }

    #[test]
    fn test_base_url_trims_trailing_slash() {
        let settings = CheckoutSettings {
            base_url: "https://shop.example.org/".to_string(),
            site_id: SiteId::new(1),
            order_number_prefix: "IAP".to_string(),
        };
        assert_eq!(settings.base_url(), "https://shop.example.org");
    }

    #[test]
    fn test_store_config_debug_redacts_secrets() {
        let google = GooglePlayConfig {
            package_name: "org.example.app".to_string(),
            access_token: SecretString::from("ya29.super_secret_token"),
            api_base_url: Url::parse(DEFAULT_GOOGLE_PLAY_API).unwrap(),
        };
        let apple = AppStoreConfig {
            bundle_id: "org.example.app".to_string(),
            shared_secret: SecretString::from("super_secret_shared"),
            sandbox_fallback: true,
            production_url: Url::parse(DEFAULT_APP_STORE_PRODUCTION).unwrap(),
            sandbox_url: Url::parse(DEFAULT_APP_STORE_SANDBOX).unwrap(),
        };

        let debug_output = format!("{google:?} {apple:?}");
        assert!(debug_output.contains("org.example.app"));
        assert!(debug_output.contains("[REDACTED]"));
        assert!(!debug_output.contains("super_secret_token"));
        assert!(!debug_output.contains("super_secret_shared"));
    }
}
