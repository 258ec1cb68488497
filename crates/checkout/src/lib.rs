//! Mobile in-app-purchase checkout.
//!
//! Android and iOS clients add products to a basket, freeze it at checkout,
//! complete store billing, then submit the store receipt here. The service
//! validates the receipt with Google Play or the App Store, records the
//! payment, places exactly one order for the basket and runs post-order hooks.
//!
//! The crate is a library so the HTTP surface can be driven in tests against
//! the in-memory store; `main.rs` wires the same router to `PostgreSQL`.

#![cfg_attr(not(test), forbid(unsafe_code))]

pub mod config;
pub mod db;
pub mod error;
pub mod middleware;
pub mod models;
pub mod routes;
pub mod services;
pub mod state;
pub mod validators;
