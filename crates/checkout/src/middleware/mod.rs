//! HTTP middleware stack for the checkout service.
//!
//! # Middleware Order (bottom to top in Router)
//!
//! 1. Sentry layers (capture errors, transactions)
//! 2. `TraceLayer` (request tracing)
//! 3. Request ID (add unique ID to each request)
//! 4. `RequireUser` extractor on every checkout route (bearer token)

pub mod auth;
pub mod request_id;

pub use auth::{RequireUser, token_digest};
pub use request_id::request_id_middleware;
