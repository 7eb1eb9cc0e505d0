//! Credit ledger consistency checks
//!
//! Read-only scans over `user_usage` for rows no sequence of debits, grants
//! and cancellations should be able to produce. Each rule is written twice,
//! once as SQL for Postgres and once as a predicate for the in-memory store,
//! and the two must agree.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use time::OffsetDateTime;

use crate::account::Account;
use crate::error::BillingResult;
use crate::store::AccountStore;
use nanoedit_shared::UserId;

/// A named consistency rule over a single account row
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Invariant {
    /// Debits never drive a balance below zero
    NonNegativeBalance,
    /// Remaining credits never exceed the current allotment
    BalanceWithinAllotment,
    /// A paid account always names its plan
    PaidHasPlan,
    /// Cancellation clears the subscription reference
    UnpaidHasNoSubscription,
}

impl Invariant {
    pub const ALL: [Invariant; 4] = [
        Invariant::NonNegativeBalance,
        Invariant::BalanceWithinAllotment,
        Invariant::PaidHasPlan,
        Invariant::UnpaidHasNoSubscription,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Invariant::NonNegativeBalance => "non_negative_balance",
            Invariant::BalanceWithinAllotment => "balance_within_allotment",
            Invariant::PaidHasPlan => "paid_has_plan",
            Invariant::UnpaidHasNoSubscription => "unpaid_has_no_subscription",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|inv| inv.name() == name)
    }

    pub fn severity(&self) -> ViolationSeverity {
        match self {
            Invariant::NonNegativeBalance => ViolationSeverity::Critical,
            Invariant::PaidHasPlan => ViolationSeverity::High,
            Invariant::BalanceWithinAllotment => ViolationSeverity::Medium,
            Invariant::UnpaidHasNoSubscription => ViolationSeverity::Medium,
        }
    }

    /// SQL `WHERE` clause selecting violating `user_usage` rows
    pub fn violation_predicate(&self) -> &'static str {
        match self {
            Invariant::NonNegativeBalance => "remaining_credits < 0 OR total_credits < 0",
            Invariant::BalanceWithinAllotment => "remaining_credits > total_credits",
            Invariant::PaidHasPlan => "is_paid AND plan_name IS NULL",
            Invariant::UnpaidHasNoSubscription => "NOT is_paid AND subscription_id IS NOT NULL",
        }
    }

    /// In-memory form of [`Invariant::violation_predicate`]
    pub fn is_violated_by(&self, account: &Account) -> bool {
        match self {
            Invariant::NonNegativeBalance => {
                account.remaining_credits < 0 || account.total_credits < 0
            }
            Invariant::BalanceWithinAllotment => {
                account.remaining_credits > account.total_credits
            }
            Invariant::PaidHasPlan => account.is_paid && account.plan_name.is_none(),
            Invariant::UnpaidHasNoSubscription => {
                !account.is_paid && account.subscription_id.is_some()
            }
        }
    }

    fn describe(&self, account: &Account) -> String {
        match self {
            Invariant::NonNegativeBalance => format!(
                "Account has negative balance ({} remaining, {} total)",
                account.remaining_credits, account.total_credits
            ),
            Invariant::BalanceWithinAllotment => format!(
                "Account has {} remaining credits but an allotment of {}",
                account.remaining_credits, account.total_credits
            ),
            Invariant::PaidHasPlan => "Paid account has no plan".to_string(),
            Invariant::UnpaidHasNoSubscription => format!(
                "Unpaid account still references subscription '{}'",
                account.subscription_id.as_deref().unwrap_or("")
            ),
        }
    }
}

/// One account row breaking one rule
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvariantViolation {
    /// Rule name, as accepted by [`InvariantChecker::run_check`]
    pub invariant: String,
    pub user_id: UserId,
    pub description: String,
    /// Balance, plan and subscription columns at scan time
    pub context: serde_json::Value,
    pub severity: ViolationSeverity,
}

/// How much a broken row can cost, ordered from least to most urgent
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ViolationSeverity {
    /// Bookkeeping drift: a stale subscription reference or remaining
    /// credits above the allotment after a manual edit
    Medium,
    /// The entitlement evaluator can report the wrong plan for the account
    High,
    /// Credits were spent that the account did not have
    Critical,
}

impl ViolationSeverity {
    pub fn as_str(&self) -> &'static str {
        match self {
            ViolationSeverity::Medium => "medium",
            ViolationSeverity::High => "high",
            ViolationSeverity::Critical => "critical",
        }
    }
}

impl std::fmt::Display for ViolationSeverity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of a full ledger scan, served by the admin invariants route
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvariantCheckSummary {
    #[serde(with = "time::serde::rfc3339")]
    pub checked_at: OffsetDateTime,
    pub checks_run: usize,
    pub checks_passed: usize,
    pub checks_failed: usize,
    /// Most urgent severity among the violations, `None` when healthy
    pub worst_severity: Option<ViolationSeverity>,
    pub violations: Vec<InvariantViolation>,
    pub healthy: bool,
}

/// Service for running ledger invariant checks
#[derive(Clone)]
pub struct InvariantChecker {
    store: Arc<dyn AccountStore>,
}

impl InvariantChecker {
    pub fn new(store: Arc<dyn AccountStore>) -> Self {
        Self { store }
    }

    /// Scan the ledger against every rule
    pub async fn run_all_checks(&self) -> BillingResult<InvariantCheckSummary> {
        let now = OffsetDateTime::now_utc();
        let mut violations = Vec::new();

        for invariant in Invariant::ALL {
            violations.extend(self.check(invariant).await?);
        }

        let checks_run = Invariant::ALL.len();
        let checks_failed = violations
            .iter()
            .map(|v| &v.invariant)
            .collect::<std::collections::HashSet<_>>()
            .len();

        let worst_severity = violations.iter().map(|v| v.severity).max();

        if let Some(worst) = worst_severity {
            tracing::warn!(
                violations = violations.len(),
                checks_failed = checks_failed,
                worst_severity = %worst,
                "Ledger invariant violations found"
            );
        }

        Ok(InvariantCheckSummary {
            checked_at: now,
            checks_run,
            checks_passed: checks_run - checks_failed,
            checks_failed,
            worst_severity,
            healthy: violations.is_empty(),
            violations,
        })
    }

    /// Run one rule by name; an unknown name finds nothing
    pub async fn run_check(&self, name: &str) -> BillingResult<Vec<InvariantViolation>> {
        match Invariant::from_name(name) {
            Some(invariant) => self.check(invariant).await,
            None => Ok(vec![]),
        }
    }

    /// Names accepted by [`InvariantChecker::run_check`]
    pub fn available_checks() -> Vec<&'static str> {
        Invariant::ALL.iter().map(|inv| inv.name()).collect()
    }

    async fn check(&self, invariant: Invariant) -> BillingResult<Vec<InvariantViolation>> {
        let accounts = self.store.accounts_violating(invariant).await?;

        Ok(accounts
            .into_iter()
            .map(|account| InvariantViolation {
                invariant: invariant.name().to_string(),
                user_id: account.user_id,
                description: invariant.describe(&account),
                context: serde_json::json!({
                    "email": account.email,
                    "is_paid": account.is_paid,
                    "plan_name": account.plan_name,
                    "remaining_credits": account.remaining_credits,
                    "total_credits": account.total_credits,
                    "subscription_id": account.subscription_id,
                }),
                severity: invariant.severity(),
            })
            .collect())
    }
}
