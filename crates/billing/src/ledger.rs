//! Credit debits
//!
//! The conditional decrement in [`AccountStore::debit`] is the single source
//! of truth for whether a credit was consumed.

use nanoedit_shared::UserId;
use std::sync::Arc;

use crate::account::DebitOutcome;
use crate::config::BillingConfig;
use crate::entitlement::{CallerIdentity, UNLIMITED_CREDITS};
use crate::error::{BillingError, BillingResult};
use crate::store::AccountStore;

#[derive(Clone)]
pub struct CreditLedger {
    store: Arc<dyn AccountStore>,
    config: Arc<BillingConfig>,
}

impl CreditLedger {
    pub fn new(store: Arc<dyn AccountStore>, config: Arc<BillingConfig>) -> Self {
        Self { store, config }
    }

    pub fn credits_per_action(&self) -> i32 {
        self.config.credits.credits_per_action
    }

    /// Atomically consume `amount` credits if the balance covers them
    pub async fn debit(&self, user_id: UserId, amount: i32) -> BillingResult<DebitOutcome> {
        if amount <= 0 {
            return Err(BillingError::InvalidAmount(amount));
        }

        let outcome = self.store.debit(user_id, amount).await?;

        if outcome.success {
            tracing::info!(
                user_id = %user_id,
                amount = amount,
                remaining_credits = outcome.remaining_credits,
                "Credits debited"
            );
            // Legacy counter; a failure here must not undo or fail the debit
            if let Err(e) = self.store.increment_generation_count(user_id).await {
                tracing::warn!(
                    user_id = %user_id,
                    error = %e,
                    "Failed to increment generation count"
                );
            }
        } else {
            tracing::info!(
                user_id = %user_id,
                amount = amount,
                remaining_credits = outcome.remaining_credits,
                "Debit rejected: insufficient balance"
            );
        }

        Ok(outcome)
    }

    /// Charge one completed generation to the caller
    ///
    /// Admins are never charged and see the unlimited sentinel.
    pub async fn charge_action(&self, identity: &CallerIdentity) -> BillingResult<DebitOutcome> {
        let email = identity.require_email()?;

        if self.config.admins.contains(email) {
            tracing::debug!(user_id = %identity.user_id, "Admin caller, no credit deduction");
            return Ok(DebitOutcome {
                success: true,
                remaining_credits: UNLIMITED_CREDITS,
            });
        }

        self.debit(identity.user_id, self.credits_per_action()).await
    }
}
