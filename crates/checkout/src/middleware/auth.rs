//! Bearer-token authentication.
//!
//! Tokens are issued by the commerce platform; this service only resolves
//! them. The database stores the SHA-256 hex digest of each token, never the
//! token itself.

use axum::{extract::FromRequestParts, http::header::AUTHORIZATION, http::request::Parts};
use sha2::{Digest, Sha256};
use tracing::Span;

use crate::error::{IapError, set_sentry_user};
use crate::models::CurrentUser;
use crate::state::AppState;

/// Hex-encoded SHA-256 digest of a bearer token.
#[must_use]
pub fn token_digest(token: &str) -> String {
    hex::encode(Sha256::digest(token.as_bytes()))
}

/// Extractor that requires an authenticated purchaser.
///
/// Rejects with `401 {"error": "Authentication credentials were not provided."}`
/// when the `Authorization: Bearer` header is missing or the token is unknown.
///
/// # Example
///
/// ```rust,ignore
/// async fn handler(RequireUser(user): RequireUser) -> impl IntoResponse {
///     format!("Hello, {}!", user.username)
/// }
/// ```
pub struct RequireUser(pub CurrentUser);

impl FromRequestParts<AppState> for RequireUser {
    type Rejection = IapError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let token = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .and_then(bearer_token)
            .ok_or(IapError::Unauthenticated)?;

        let user = state
            .storage()
            .users
            .find_by_token_digest(&token_digest(token))
            .await?
            .ok_or(IapError::Unauthenticated)?;

        Span::current().record("user_id", user.id.as_i64());
        set_sentry_user(&user.id, Some(user.email.as_str()));

        Ok(Self(user))
    }
}

/// The token of a `Bearer <token>` header value.
fn bearer_token(header: &str) -> Option<&str> {
    let (scheme, token) = header.trim().split_once(' ')?;
    let token = token.trim();
    (scheme.eq_ignore_ascii_case("bearer") && !token.is_empty()).then_some(token)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_digest_is_sha256_hex() {
        assert_eq!(
            token_digest("abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_bearer_token_parsing() {
        assert_eq!(bearer_token("Bearer tok-1"), Some("tok-1"));
        assert_eq!(bearer_token("bearer  tok-2 "), Some("tok-2"));
        assert_eq!(bearer_token("Basic dXNlcjpwYXNz"), None);
        assert_eq!(bearer_token("Bearer "), None);
        assert_eq!(bearer_token("tok-3"), None);
    }
}
