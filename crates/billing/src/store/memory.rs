//! In-memory account store
//!
//! Used by tests and local development. Each operation runs under a single
//! write lock, which gives it the same single-row atomicity as the Postgres
//! statements.

use async_trait::async_trait;
use nanoedit_shared::UserId;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use time::OffsetDateTime;
use tokio::sync::RwLock;

use super::AccountStore;
use crate::account::{
    Account, AccountDefaults, AccountPatch, CreditGrant, DebitOutcome, GrantApplication,
};
use crate::error::{BillingError, BillingResult};
use crate::invariants::Invariant;

#[derive(Default)]
struct Ledger {
    accounts: HashMap<UserId, Account>,
    /// Grant keys already applied, per account
    grant_keys: HashSet<(UserId, String)>,
}

#[derive(Clone, Default)]
pub struct MemoryAccountStore {
    ledger: Arc<RwLock<Ledger>>,
    unavailable: Arc<AtomicBool>,
}

impl MemoryAccountStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent call fail with `StoreUnavailable`
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Insert a record as-is, bypassing the normal mutation paths
    pub async fn insert(&self, account: Account) {
        self.ledger.write().await.accounts.insert(account.user_id, account);
    }

    pub async fn len(&self) -> usize {
        self.ledger.read().await.accounts.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.ledger.read().await.accounts.is_empty()
    }

    fn check_available(&self) -> BillingResult<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(BillingError::StoreUnavailable(
                "in-memory store marked unavailable".to_string(),
            ));
        }
        Ok(())
    }
}

fn blank_account(user_id: UserId, email: &str) -> Account {
    let now = OffsetDateTime::now_utc();
    Account {
        user_id,
        email: email.to_string(),
        is_paid: false,
        plan_name: None,
        billing_type: None,
        remaining_credits: 0,
        total_credits: 0,
        generation_count: 0,
        subscription_id: None,
        customer_id: None,
        order_id: None,
        created_at: now,
        updated_at: now,
    }
}

#[async_trait]
impl AccountStore for MemoryAccountStore {
    async fn get(&self, user_id: UserId) -> BillingResult<Account> {
        self.check_available()?;
        self.ledger
            .read()
            .await
            .accounts
            .get(&user_id)
            .cloned()
            .ok_or(BillingError::NotFound(user_id))
    }

    async fn create(
        &self,
        user_id: UserId,
        email: &str,
        defaults: &AccountDefaults,
    ) -> BillingResult<Account> {
        self.check_available()?;
        let mut ledger = self.ledger.write().await;
        let accounts = &mut ledger.accounts;
        let account = accounts.entry(user_id).or_insert_with(|| {
            let mut account = blank_account(user_id, email);
            account.is_paid = defaults.is_paid;
            account.plan_name = defaults.plan_name;
            account.remaining_credits = defaults.remaining_credits;
            account.total_credits = defaults.total_credits;
            account
        });
        Ok(account.clone())
    }

    async fn update(&self, user_id: UserId, patch: &AccountPatch) -> BillingResult<Account> {
        self.check_available()?;
        patch.validate()?;
        let mut ledger = self.ledger.write().await;
        let accounts = &mut ledger.accounts;
        let account = accounts
            .get_mut(&user_id)
            .ok_or(BillingError::NotFound(user_id))?;
        patch.apply_to(account);
        account.updated_at = OffsetDateTime::now_utc();
        Ok(account.clone())
    }

    async fn upsert(
        &self,
        user_id: UserId,
        email: &str,
        patch: &AccountPatch,
    ) -> BillingResult<Account> {
        self.check_available()?;
        patch.validate()?;
        let mut ledger = self.ledger.write().await;
        let accounts = &mut ledger.accounts;
        let account = accounts
            .entry(user_id)
            .or_insert_with(|| blank_account(user_id, email));
        patch.apply_to(account);
        account.email = email.trim().to_string();
        account.updated_at = OffsetDateTime::now_utc();
        Ok(account.clone())
    }

    async fn debit(&self, user_id: UserId, amount: i32) -> BillingResult<DebitOutcome> {
        self.check_available()?;
        if amount <= 0 {
            return Err(BillingError::InvalidAmount(amount));
        }
        let mut ledger = self.ledger.write().await;
        let accounts = &mut ledger.accounts;
        match accounts.get_mut(&user_id) {
            Some(account) if account.remaining_credits >= amount => {
                account.remaining_credits -= amount;
                account.updated_at = OffsetDateTime::now_utc();
                Ok(DebitOutcome {
                    success: true,
                    remaining_credits: account.remaining_credits,
                })
            }
            Some(account) => Ok(DebitOutcome {
                success: false,
                remaining_credits: account.remaining_credits,
            }),
            None => Ok(DebitOutcome {
                success: false,
                remaining_credits: 0,
            }),
        }
    }

    async fn increment_generation_count(&self, user_id: UserId) -> BillingResult<()> {
        self.check_available()?;
        if let Some(account) = self.ledger.write().await.accounts.get_mut(&user_id) {
            account.generation_count += 1;
        }
        Ok(())
    }

    async fn apply_grant(&self, grant: &CreditGrant) -> BillingResult<GrantApplication> {
        self.check_available()?;
        if grant.credits < 0 {
            return Err(BillingError::InvalidAmount(grant.credits));
        }
        let mut ledger = self.ledger.write().await;
        let Ledger {
            accounts,
            grant_keys,
        } = &mut *ledger;

        if let Some(key) = &grant.grant_key {
            if !grant_keys.insert((grant.user_id, key.clone())) {
                return Ok(GrantApplication::Duplicate);
            }
        }

        let account = accounts
            .entry(grant.user_id)
            .or_insert_with(|| blank_account(grant.user_id, &grant.email));

        account.email = grant.email.clone();
        account.is_paid = true;
        account.plan_name = Some(grant.plan);
        account.billing_type = Some(grant.billing_type);
        account.remaining_credits = grant.credits;
        account.total_credits = grant.credits;
        if grant.refs.subscription_id.is_some() {
            account.subscription_id = grant.refs.subscription_id.clone();
        }
        if grant.refs.customer_id.is_some() {
            account.customer_id = grant.refs.customer_id.clone();
        }
        if grant.refs.order_id.is_some() {
            account.order_id = grant.refs.order_id.clone();
        }
        account.updated_at = OffsetDateTime::now_utc();
        Ok(GrantApplication::Applied(account.clone()))
    }

    async fn revoke(&self, user_id: UserId) -> BillingResult<Account> {
        self.check_available()?;
        let mut ledger = self.ledger.write().await;
        let accounts = &mut ledger.accounts;
        let account = accounts
            .get_mut(&user_id)
            .ok_or(BillingError::NotFound(user_id))?;
        account.is_paid = false;
        account.remaining_credits = 0;
        account.total_credits = 0;
        account.plan_name = None;
        account.billing_type = None;
        account.subscription_id = None;
        account.updated_at = OffsetDateTime::now_utc();
        Ok(account.clone())
    }

    async fn accounts_violating(&self, invariant: Invariant) -> BillingResult<Vec<Account>> {
        self.check_available()?;
        Ok(self
            .ledger
            .read()
            .await
            .accounts
            .values()
            .filter(|account| invariant.is_violated_by(account))
            .cloned()
            .collect())
    }
}
