//! Entitlement evaluation
//!
//! Decides whether a caller may start a paid generation. The answer is
//! advisory: it keeps obviously broke callers away from the costly external
//! call, while the debit in [`crate::ledger`] decides whether credits were
//! actually consumed.

use nanoedit_shared::{BillingType, PlanName, UserId};
use serde::Serialize;
use std::sync::Arc;

use crate::account::{Account, AccountDefaults, AccountPatch};
use crate::config::BillingConfig;
use crate::error::{BillingError, BillingResult};
use crate::store::AccountStore;

/// Balance reported for accounts that are never charged
pub const UNLIMITED_CREDITS: i32 = -1;

/// Already-authenticated caller, as supplied by the identity provider
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallerIdentity {
    pub user_id: UserId,
    pub email: Option<String>,
}

impl CallerIdentity {
    pub fn new(user_id: UserId, email: impl Into<String>) -> Self {
        Self {
            user_id,
            email: Some(email.into()),
        }
    }

    pub fn require_email(&self) -> BillingResult<&str> {
        self.email
            .as_deref()
            .map(str::trim)
            .filter(|e| !e.is_empty())
            .ok_or(BillingError::MissingEmail)
    }
}

/// Permission and quota state for a caller at one point in time
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Entitlement {
    pub can_perform: bool,
    pub unlimited: bool,
    pub is_admin: bool,
    pub is_paid: bool,
    /// [`UNLIMITED_CREDITS`] when `unlimited`
    pub remaining_credits: i32,
    pub total_credits: i32,
    /// `None` when `unlimited`
    pub remaining_generations: Option<i32>,
    pub plan_name: Option<PlanName>,
    pub billing_type: Option<BillingType>,
    pub reason: String,
}

impl Entitlement {
    fn admin() -> Self {
        Self {
            can_perform: true,
            unlimited: true,
            is_admin: true,
            is_paid: true,
            remaining_credits: UNLIMITED_CREDITS,
            total_credits: UNLIMITED_CREDITS,
            remaining_generations: None,
            plan_name: Some(PlanName::Admin),
            billing_type: None,
            reason: "Admin account - unlimited generations".to_string(),
        }
    }
}

#[derive(Clone)]
pub struct EntitlementService {
    store: Arc<dyn AccountStore>,
    config: Arc<BillingConfig>,
}

impl EntitlementService {
    pub fn new(store: Arc<dyn AccountStore>, config: Arc<BillingConfig>) -> Self {
        Self { store, config }
    }

    pub fn is_admin(&self, identity: &CallerIdentity) -> bool {
        identity
            .require_email()
            .map(|email| self.config.admins.contains(email))
            .unwrap_or(false)
    }

    /// Evaluate a caller, creating a free-trial account on first sight
    pub async fn evaluate(&self, identity: &CallerIdentity) -> BillingResult<Entitlement> {
        let email = identity.require_email()?;

        if self.config.admins.contains(email) {
            tracing::debug!(user_id = %identity.user_id, "Admin caller, skipping balance check");
            return Ok(Entitlement::admin());
        }

        let account = match self.store.get(identity.user_id).await {
            Ok(account) => account,
            Err(BillingError::NotFound(_)) => {
                let defaults = AccountDefaults::free_trial(self.config.credits.free_trial_credits);
                let account = self
                    .store
                    .create(identity.user_id, email, &defaults)
                    .await?;
                tracing::info!(
                    user_id = %identity.user_id,
                    credits = account.remaining_credits,
                    "Created free trial account"
                );
                account
            }
            Err(e) => return Err(e),
        };

        if account.email != email {
            self.refresh_email(identity.user_id, email).await;
        }

        Ok(self.entitlement_for(&account))
    }

    /// Like [`EntitlementService::evaluate`] but fails when the caller cannot pay
    pub async fn require(&self, identity: &CallerIdentity) -> BillingResult<Entitlement> {
        let entitlement = self.evaluate(identity).await?;
        if !entitlement.can_perform {
            return Err(BillingError::InsufficientCredits {
                remaining: entitlement.remaining_credits,
                required: self.config.credits.credits_per_action,
            });
        }
        Ok(entitlement)
    }

    pub fn entitlement_for(&self, account: &Account) -> Entitlement {
        let credits = &self.config.credits;
        let can_perform = account.remaining_credits >= credits.credits_per_action;
        let generations = credits.generations_for(account.remaining_credits);

        let reason = if !can_perform {
            "Insufficient credits. Please upgrade to continue.".to_string()
        } else if account.plan_name == Some(PlanName::FreeTrial) && !account.is_paid {
            format!("Free trial: {} generation(s) available", generations)
        } else {
            format!("{} generation(s) remaining", generations)
        };

        Entitlement {
            can_perform,
            unlimited: false,
            is_admin: false,
            is_paid: account.is_paid,
            remaining_credits: account.remaining_credits,
            total_credits: account.total_credits,
            remaining_generations: Some(generations),
            plan_name: account.plan_name,
            billing_type: account.billing_type,
            reason,
        }
    }

    async fn refresh_email(&self, user_id: UserId, email: &str) {
        let patch = AccountPatch {
            email: Some(email.to_string()),
            ..Default::default()
        };
        if let Err(e) = self.store.update(user_id, &patch).await {
            tracing::warn!(user_id = %user_id, error = %e, "Failed to refresh account email");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AdminAllowlist, CreditConfig};
    use crate::store::MemoryAccountStore;

    fn service(store: &MemoryAccountStore, admins: &str) -> EntitlementService {
        let config = BillingConfig::default().with_admins(AdminAllowlist::from_csv(admins));
        EntitlementService::new(Arc::new(store.clone()), Arc::new(config))
    }

    #[tokio::test]
    async fn test_new_user_gets_free_trial() {
        let store = MemoryAccountStore::new();
        let svc = service(&store, "");
        let identity = CallerIdentity::new(UserId::new(), "new@example.com");

        let entitlement = svc.evaluate(&identity).await.unwrap();

        assert!(entitlement.can_perform);
        assert!(!entitlement.unlimited);
        assert_eq!(entitlement.remaining_credits, 2);
        assert_eq!(entitlement.total_credits, 2);
        assert_eq!(entitlement.remaining_generations, Some(1));
        assert_eq!(entitlement.plan_name, Some(PlanName::FreeTrial));
        assert_eq!(entitlement.reason, "Free trial: 1 generation(s) available");

        let account = store.get(identity.user_id).await.unwrap();
        assert_eq!(account.remaining_credits, 2);
        assert_eq!(account.total_credits, 2);
        assert!(!account.is_paid);
    }

    #[tokio::test]
    async fn test_admin_bypasses_store() {
        let store = MemoryAccountStore::new();
        let svc = service(&store, "boss@example.com");
        let identity = CallerIdentity::new(UserId::new(), "Boss@Example.com");

        let entitlement = svc.evaluate(&identity).await.unwrap();

        assert!(entitlement.can_perform);
        assert!(entitlement.unlimited);
        assert!(entitlement.is_admin);
        assert_eq!(entitlement.remaining_credits, UNLIMITED_CREDITS);
        assert_eq!(entitlement.remaining_generations, None);
        assert!(store.is_empty().await, "admin check must not create records");
    }

    #[tokio::test]
    async fn test_admin_unlimited_even_with_stored_zero_balance() {
        let store = MemoryAccountStore::new();
        let user_id = UserId::new();
        store
            .create(user_id, "boss@example.com", &AccountDefaults::free_trial(0))
            .await
            .unwrap();
        let svc = service(&store, "boss@example.com");

        let entitlement = svc
            .evaluate(&CallerIdentity::new(user_id, "boss@example.com"))
            .await
            .unwrap();
        assert!(entitlement.can_perform);
        assert_eq!(entitlement.remaining_credits, UNLIMITED_CREDITS);
    }

    #[tokio::test]
    async fn test_balance_below_cost_cannot_perform() {
        let store = MemoryAccountStore::new();
        let user_id = UserId::new();
        store
            .create(user_id, "low@example.com", &AccountDefaults::free_trial(1))
            .await
            .unwrap();
        let svc = service(&store, "");
        let identity = CallerIdentity::new(user_id, "low@example.com");

        let entitlement = svc.evaluate(&identity).await.unwrap();
        assert!(!entitlement.can_perform);
        assert_eq!(entitlement.remaining_credits, 1);
        assert_eq!(entitlement.remaining_generations, Some(0));

        assert!(matches!(
            svc.require(&identity).await,
            Err(BillingError::InsufficientCredits {
                remaining: 1,
                required: 2
            })
        ));
    }

    #[tokio::test]
    async fn test_missing_email_rejected_before_store() {
        let store = MemoryAccountStore::new();
        store.set_unavailable(true);
        let svc = service(&store, "");
        let identity = CallerIdentity {
            user_id: UserId::new(),
            email: None,
        };

        assert!(matches!(
            svc.evaluate(&identity).await,
            Err(BillingError::MissingEmail)
        ));
    }

    #[tokio::test]
    async fn test_store_failure_is_not_a_zero_balance() {
        let store = MemoryAccountStore::new();
        store.set_unavailable(true);
        let svc = service(&store, "");

        let result = svc
            .evaluate(&CallerIdentity::new(UserId::new(), "u@example.com"))
            .await;
        assert!(matches!(result, Err(BillingError::StoreUnavailable(_))));
    }

    #[tokio::test]
    async fn test_email_change_is_persisted() {
        let store = MemoryAccountStore::new();
        let user_id = UserId::new();
        store
            .create(user_id, "old@example.com", &AccountDefaults::free_trial(2))
            .await
            .unwrap();
        let svc = service(&store, "");

        svc.evaluate(&CallerIdentity::new(user_id, "new@example.com"))
            .await
            .unwrap();
        assert_eq!(store.get(user_id).await.unwrap().email, "new@example.com");
    }

    #[tokio::test]
    async fn test_custom_cost_per_action() {
        let store = MemoryAccountStore::new();
        let user_id = UserId::new();
        store
            .create(user_id, "u@example.com", &AccountDefaults::free_trial(10))
            .await
            .unwrap();
        let config = BillingConfig::default().with_credits(CreditConfig {
            credits_per_action: 4,
            free_trial_credits: 4,
        });
        let svc = EntitlementService::new(Arc::new(store), Arc::new(config));

        let entitlement = svc
            .evaluate(&CallerIdentity::new(user_id, "u@example.com"))
            .await
            .unwrap();
        assert_eq!(entitlement.remaining_generations, Some(2));
    }
}
