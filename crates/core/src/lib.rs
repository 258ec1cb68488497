//! IAP Checkout Core - Shared types library.
//!
//! This crate provides the domain vocabulary shared by every IAP checkout
//! component:
//! - `checkout` - HTTP service handling add-to-basket, checkout and receipt execution
//! - `cli` - Command-line tools for migrations and seeding
//!
//! # Architecture
//!
//! The core crate contains only types - no I/O, no database access, no HTTP
//! clients. Storage backends opt into `sqlx` encoding through the `postgres`
//! feature.
//!
//! # Modules
//!
//! - [`types`] - Newtype IDs, prices, emails, statuses and payment processor names

#![cfg_attr(not(test), forbid(unsafe_code))]

pub mod types;

pub use types::*;
