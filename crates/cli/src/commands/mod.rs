//! CLI command implementations.

pub mod migrate;
pub mod product;
pub mod user;

use secrecy::SecretString;
use thiserror::Error;

/// Missing configuration for a command.
#[derive(Debug, Error)]
pub enum EnvError {
    #[error("Missing environment variable: {0}")]
    MissingEnvVar(&'static str),
}

/// Database URL from `IAP_DATABASE_URL`, falling back to `DATABASE_URL`.
fn database_url() -> Result<SecretString, EnvError> {
    dotenvy::dotenv().ok();

    std::env::var("IAP_DATABASE_URL")
        .or_else(|_| std::env::var("DATABASE_URL"))
        .map(SecretString::from)
        .map_err(|_| EnvError::MissingEnvVar("IAP_DATABASE_URL"))
}
