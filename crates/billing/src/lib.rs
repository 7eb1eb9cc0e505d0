// Billing crate clippy configuration
#![allow(clippy::result_large_err)] // BillingError carries provider error text
// Test code patterns (expected in test files):
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! NanoEdit Billing Module
//!
//! The credit ledger behind paid image generation.
//!
//! ## Features
//!
//! - **Account Store**: one row per user, every mutation a single atomic statement
//! - **Entitlements**: admin bypass, free-trial provisioning, remaining generations
//! - **Credit Debits**: conditional decrement that can never overdraw
//! - **Webhooks**: idempotent plan grants and cancellations from Creem
//! - **Checkout**: hosted Creem checkout sessions for plan purchases
//! - **Invariants**: read-only consistency scans over the ledger

pub mod account;
pub mod checkout;
pub mod config;
pub mod entitlement;
pub mod error;
pub mod invariants;
pub mod ledger;
pub mod store;
pub mod webhooks;


// Accounts
pub use account::{
    Account, AccountDefaults, AccountPatch, CreditGrant, DebitOutcome, GrantApplication,
    ProviderRefs,
};

// Checkout
pub use checkout::{CheckoutService, CheckoutSession, CreemConfig};

// Config
pub use config::{AdminAllowlist, BillingConfig, CreditConfig, PlanCatalog};

// Entitlement
pub use entitlement::{CallerIdentity, Entitlement, EntitlementService, UNLIMITED_CREDITS};

// Error
pub use error::{BillingError, BillingResult};

// Invariants
pub use invariants::{
    Invariant, InvariantCheckSummary, InvariantChecker, InvariantViolation, ViolationSeverity,
};

// Ledger
pub use ledger::CreditLedger;

// Store
pub use store::{AccountStore, MemoryAccountStore, PgAccountStore};

// Webhooks
pub use webhooks::{GrantOutcome, PaymentEvent, WebhookHandler, WebhookReceipt};

use sqlx::PgPool;
use std::sync::Arc;

/// Main billing service that combines all billing functionality
#[derive(Clone)]
pub struct BillingService {
    pub store: Arc<dyn AccountStore>,
    pub config: Arc<BillingConfig>,
    pub entitlements: EntitlementService,
    pub ledger: CreditLedger,
    pub webhooks: WebhookHandler,
    /// `None` when Creem is not configured
    pub checkout: Option<CheckoutService>,
    pub invariants: InvariantChecker,
}

impl BillingService {
    /// Create a billing service over any account store
    pub fn new(
        store: Arc<dyn AccountStore>,
        config: BillingConfig,
        creem: Option<CreemConfig>,
        webhook_secret: Option<String>,
    ) -> BillingResult<Self> {
        let config = Arc::new(config);

        Ok(Self {
            entitlements: EntitlementService::new(store.clone(), config.clone()),
            ledger: CreditLedger::new(store.clone(), config.clone()),
            webhooks: WebhookHandler::new(store.clone(), config.catalog.clone(), webhook_secret),
            checkout: creem.map(CheckoutService::new).transpose()?,
            invariants: InvariantChecker::new(store.clone()),
            config,
            store,
        })
    }

    /// Create a Postgres-backed billing service from environment variables
    pub fn from_env(pool: PgPool) -> BillingResult<Self> {
        let config = BillingConfig::from_env()?;
        let creem = CreemConfig::from_env();
        if creem.is_none() {
            tracing::warn!("Creem checkout not configured (missing CREEM_API_KEY)");
        }

        let webhook_secret = std::env::var("CREEM_WEBHOOK_SECRET")
            .ok()
            .filter(|s| !s.trim().is_empty());
        if webhook_secret.is_none() {
            tracing::warn!("Webhook signatures not verified (missing CREEM_WEBHOOK_SECRET)");
        }

        tracing::info!(
            credits_per_action = config.credits.credits_per_action,
            free_trial_credits = config.credits.free_trial_credits,
            admins = config.admins.len(),
            "Billing configured"
        );

        Self::new(
            Arc::new(PgAccountStore::new(pool)),
            config,
            creem,
            webhook_secret,
        )
    }

    /// Checkout client, or `PaymentsNotConfigured`
    pub fn checkout(&self) -> BillingResult<&CheckoutService> {
        self.checkout
            .as_ref()
            .ok_or(BillingError::PaymentsNotConfigured)
    }
}
