//! Authenticated purchaser.

use serde::{Deserialize, Serialize};

use iap_checkout_core::{Email, UserId};

/// The user an incoming request was authenticated as.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CurrentUser {
    pub id: UserId,
    pub email: Email,
    pub username: String,
}
