//! Purchaser account commands.
//!
//! # Usage
//!
//! ```bash
//! # Create a purchaser and issue a bearer token
//! iap-cli user create -e learner@example.org -u learner
//!
//! # Issue another token for an existing purchaser
//! iap-cli user token -e learner@example.org
//! ```
//!
//! Tokens are printed once. Only their SHA-256 digest is stored.

use rand::Rng;
use rand::distr::Alphanumeric;
use sqlx::PgPool;
use thiserror::Error;

use iap_checkout::middleware::token_digest;
use iap_checkout_core::Email;

use super::{EnvError, database_url};

const TOKEN_LENGTH: usize = 48;

/// Errors that can occur during user operations.
#[derive(Debug, Error)]
pub enum UserError {
    #[error(transparent)]
    Env(#[from] EnvError),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Invalid email: {0}")]
    InvalidEmail(String),

    #[error("User already exists with email: {0}")]
    UserExists(String),

    #[error("No user with email: {0}")]
    UnknownUser(String),
}

/// Create a purchaser and issue their first token.
///
/// # Errors
///
/// Returns `UserError` if the email is invalid, already registered, or the
/// database is unreachable.
pub async fn create(email: &str, username: &str) -> Result<i64, UserError> {
    let email = Email::parse(email).map_err(|_| UserError::InvalidEmail(email.to_owned()))?;
    let pool = connect().await?;

    let existing = sqlx::query_scalar::<_, i64>("SELECT id FROM iap.app_user WHERE email = $1")
        .bind(email.as_str())
        .fetch_optional(&pool)
        .await?;
    if existing.is_some() {
        return Err(UserError::UserExists(email.to_string()));
    }

    let user_id = sqlx::query_scalar::<_, i64>(
        "INSERT INTO iap.app_user (email, username) VALUES ($1, $2) RETURNING id",
    )
    .bind(email.as_str())
    .bind(username)
    .fetch_one(&pool)
    .await?;

    tracing::info!("User created! ID: {}, Email: {}", user_id, email);
    issue(&pool, user_id).await?;
    Ok(user_id)
}

/// Issue an additional token for an existing purchaser.
///
/// # Errors
///
/// Returns `UserError` if no user has this email or the database is
/// unreachable.
pub async fn token(email: &str) -> Result<(), UserError> {
    let pool = connect().await?;

    let user_id = sqlx::query_scalar::<_, i64>("SELECT id FROM iap.app_user WHERE email = $1")
        .bind(email)
        .fetch_optional(&pool)
        .await?
        .ok_or_else(|| UserError::UnknownUser(email.to_owned()))?;

    issue(&pool, user_id).await
}

async fn connect() -> Result<PgPool, UserError> {
    let database_url = database_url()?;
    tracing::info!("Connecting to checkout database...");
    Ok(iap_checkout::db::create_pool(&database_url).await?)
}

async fn issue(pool: &PgPool, user_id: i64) -> Result<(), UserError> {
    let token = generate_token();

    sqlx::query("INSERT INTO iap.access_token (token_digest, user_id) VALUES ($1, $2)")
        .bind(token_digest(&token))
        .bind(user_id)
        .execute(pool)
        .await?;

    tracing::info!("Bearer token (shown once):");
    tracing::info!("  {}", token);
    Ok(())
}

fn generate_token() -> String {
    rand::rng()
        .sample_iter(&Alphanumeric)
        .take(TOKEN_LENGTH)
        .map(char::from)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tokens_are_long_and_distinct() {
        let first = generate_token();
        let second = generate_token();

        assert_eq!(first.len(), TOKEN_LENGTH);
        assert!(first.chars().all(|c| c.is_ascii_alphanumeric()));
        assert_ne!(first, second);
    }
}
