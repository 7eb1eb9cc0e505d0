//! Ledger configuration
//!
//! Everything the evaluator and grant handler need to know about prices and
//! privileges lives here. It is built once at startup and handed to the
//! services at construction, so tests can substitute their own values.

use nanoedit_shared::{BillingType, PlanName};
use std::collections::{HashMap, HashSet};

use crate::error::{BillingError, BillingResult};

/// Credits consumed by one image generation
pub const DEFAULT_CREDITS_PER_ACTION: i32 = 2;

/// Credits seeded into a brand new account (one generation)
pub const DEFAULT_FREE_TRIAL_CREDITS: i32 = 2;

/// Credit exchange rates
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CreditConfig {
    pub credits_per_action: i32,
    pub free_trial_credits: i32,
}

impl Default for CreditConfig {
    fn default() -> Self {
        Self {
            credits_per_action: DEFAULT_CREDITS_PER_ACTION,
            free_trial_credits: DEFAULT_FREE_TRIAL_CREDITS,
        }
    }
}

impl CreditConfig {
    /// Load rates from environment or use defaults
    pub fn from_env() -> BillingResult<Self> {
        let config = Self {
            credits_per_action: env_i32("CREDITS_PER_ACTION")?
                .unwrap_or(DEFAULT_CREDITS_PER_ACTION),
            free_trial_credits: env_i32("FREE_TRIAL_CREDITS")?
                .unwrap_or(DEFAULT_FREE_TRIAL_CREDITS),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> BillingResult<()> {
        if self.credits_per_action <= 0 {
            return Err(BillingError::Configuration(format!(
                "CREDITS_PER_ACTION must be positive, got {}",
                self.credits_per_action
            )));
        }
        if self.free_trial_credits < 0 {
            return Err(BillingError::Configuration(format!(
                "FREE_TRIAL_CREDITS must not be negative, got {}",
                self.free_trial_credits
            )));
        }
        Ok(())
    }

    /// Whole generations a balance pays for
    pub fn generations_for(&self, credits: i32) -> i32 {
        if credits <= 0 {
            0
        } else {
            credits / self.credits_per_action
        }
    }
}

/// Email addresses exempt from credit enforcement
///
/// Matching is case-insensitive and ignores surrounding whitespace.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AdminAllowlist {
    emails: HashSet<String>,
}

impl AdminAllowlist {
    pub fn new<I, S>(emails: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let emails = emails
            .into_iter()
            .map(|e| e.as_ref().trim().to_ascii_lowercase())
            .filter(|e| !e.is_empty())
            .collect();
        Self { emails }
    }

    /// Parse a comma separated list such as `ADMIN_EMAILS`
    pub fn from_csv(csv: &str) -> Self {
        Self::new(csv.split(','))
    }

    pub fn from_env() -> Self {
        Self::from_csv(&std::env::var("ADMIN_EMAILS").unwrap_or_default())
    }

    pub fn contains(&self, email: &str) -> bool {
        self.emails.contains(&email.trim().to_ascii_lowercase())
    }

    pub fn len(&self) -> usize {
        self.emails.len()
    }

    pub fn is_empty(&self) -> bool {
        self.emails.is_empty()
    }
}

/// Credit allotment per plan and billing cadence
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlanCatalog {
    allotments: HashMap<(PlanName, BillingType), i32>,
}

impl Default for PlanCatalog {
    /// Yearly plans receive the full annual allotment up front, monthly plans
    /// a twelfth of it every cycle.
    fn default() -> Self {
        let mut allotments = HashMap::new();
        for (plan, yearly) in [
            (PlanName::Basic, 1800),
            (PlanName::Pro, 9600),
            (PlanName::Max, 55200),
        ] {
            allotments.insert((plan, BillingType::Yearly), yearly);
            allotments.insert((plan, BillingType::Monthly), yearly / 12);
        }
        Self { allotments }
    }
}

impl PlanCatalog {
    /// Catalog with no plans; combine with [`PlanCatalog::with_allotment`]
    pub fn empty() -> Self {
        Self {
            allotments: HashMap::new(),
        }
    }

    pub fn with_allotment(mut self, plan: PlanName, billing: BillingType, credits: i32) -> Self {
        self.allotments.insert((plan, billing), credits);
        self
    }

    pub fn allotment(&self, plan: PlanName, billing: BillingType) -> Option<i32> {
        self.allotments.get(&(plan, billing)).copied()
    }

    /// Defaults overridden by `PLAN_CREDITS_<PLAN>_<BILLING>` variables
    pub fn from_env() -> BillingResult<Self> {
        let mut catalog = Self::default();
        for plan in PlanName::PURCHASABLE {
            for billing in BillingType::ALL {
                let key = format!(
                    "PLAN_CREDITS_{}_{}",
                    plan.as_str().to_ascii_uppercase(),
                    billing.as_str().to_ascii_uppercase()
                );
                if let Some(credits) = env_i32(&key)? {
                    if credits < 0 {
                        return Err(BillingError::Configuration(format!(
                            "{} must not be negative",
                            key
                        )));
                    }
                    catalog.allotments.insert((plan, billing), credits);
                }
            }
        }
        Ok(catalog)
    }
}

/// Complete ledger configuration
#[derive(Debug, Clone, Default)]
pub struct BillingConfig {
    pub credits: CreditConfig,
    pub admins: AdminAllowlist,
    pub catalog: PlanCatalog,
}

impl BillingConfig {
    pub fn from_env() -> BillingResult<Self> {
        Ok(Self {
            credits: CreditConfig::from_env()?,
            admins: AdminAllowlist::from_env(),
            catalog: PlanCatalog::from_env()?,
        })
    }

    pub fn with_admins(mut self, admins: AdminAllowlist) -> Self {
        self.admins = admins;
        self
    }

    pub fn with_credits(mut self, credits: CreditConfig) -> Self {
        self.credits = credits;
        self
    }

    pub fn with_catalog(mut self, catalog: PlanCatalog) -> Self {
        self.catalog = catalog;
        self
    }
}

fn env_i32(key: &str) -> BillingResult<Option<i32>> {
    match std::env::var(key) {
        Ok(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| BillingError::Configuration(format!("{} must be an integer", key))),
        _ => Ok(None),
    }
}
