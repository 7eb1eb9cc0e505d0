#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! NanoEdit shared types
//!
//! Identifiers, plan vocabulary and database plumbing used by both the
//! billing crate and the API server.

pub mod db;
pub mod types;

pub use db::{create_pool, run_migrations};
pub use types::{BillingType, PlanName, UnknownVariant, UserId};
