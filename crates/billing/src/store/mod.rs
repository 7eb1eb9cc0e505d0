//! Account record storage
//!
//! Every mutating method is a single atomic operation against one row. Callers
//! never read a balance, adjust it in application code and write it back.

mod memory;
mod postgres;

pub use memory::MemoryAccountStore;
pub use postgres::PgAccountStore;

use async_trait::async_trait;
use nanoedit_shared::UserId;

use crate::account::{
    Account, AccountDefaults, AccountPatch, CreditGrant, DebitOutcome, GrantApplication,
};
use crate::error::BillingResult;
use crate::invariants::Invariant;

#[async_trait]
pub trait AccountStore: Send + Sync {
    /// Fetch an account, failing with `NotFound` when there is no row
    async fn get(&self, user_id: UserId) -> BillingResult<Account>;

    /// Insert a new account unless one already exists
    ///
    /// If another request created the row first, that row is returned.
    async fn create(
        &self,
        user_id: UserId,
        email: &str,
        defaults: &AccountDefaults,
    ) -> BillingResult<Account>;

    /// Apply a partial update to an existing account
    async fn update(&self, user_id: UserId, patch: &AccountPatch) -> BillingResult<Account>;

    /// Insert or update keyed by `user_id`
    async fn upsert(
        &self,
        user_id: UserId,
        email: &str,
        patch: &AccountPatch,
    ) -> BillingResult<Account>;

    /// Decrement `remaining_credits` by `amount` only if the balance covers it
    async fn debit(&self, user_id: UserId, amount: i32) -> BillingResult<DebitOutcome>;

    /// Bump the legacy generation counter
    async fn increment_generation_count(&self, user_id: UserId) -> BillingResult<()>;

    /// Allocate a plan's credits unless the grant's order was already applied
    async fn apply_grant(&self, grant: &CreditGrant) -> BillingResult<GrantApplication>;

    /// Drop paid status and zero both balances
    async fn revoke(&self, user_id: UserId) -> BillingResult<Account>;

    /// Accounts currently breaking the given invariant
    async fn accounts_violating(&self, invariant: Invariant) -> BillingResult<Vec<Account>>;
}
