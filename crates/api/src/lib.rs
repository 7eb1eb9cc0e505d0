// API crate clippy configuration
#![allow(clippy::result_large_err)] // ApiError wraps BillingError
// Test code patterns:
#![cfg_attr(test, allow(clippy::expect_used))]
#![cfg_attr(test, allow(clippy::unwrap_used))]

//! NanoEdit API Library
//!
//! HTTP surface of the credit ledger: usage, paid generation, checkout,
//! payment webhooks and admin tooling.

pub mod auth;
pub mod config;
pub mod error;
pub mod generation;
pub mod routes;
pub mod state;

pub use config::Config;
pub use error::{ApiError, ApiResult};
pub use state::AppState;
