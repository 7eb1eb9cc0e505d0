//! Account record and mutation shapes

use nanoedit_shared::{BillingType, PlanName, UserId};
use serde::{Deserialize, Deserializer, Serialize};
use time::OffsetDateTime;

use crate::error::{BillingError, BillingResult};

/// Per-user credit ledger row
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Account {
    pub user_id: UserId,
    pub email: String,
    pub is_paid: bool,
    pub plan_name: Option<PlanName>,
    pub billing_type: Option<BillingType>,
    pub remaining_credits: i32,
    pub total_credits: i32,
    /// Legacy per-generation counter, maintained best-effort
    pub generation_count: i32,
    pub subscription_id: Option<String>,
    pub customer_id: Option<String>,
    /// Order of the last grant applied to this account
    pub order_id: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

/// Initial values for a lazily created account
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountDefaults {
    pub is_paid: bool,
    pub plan_name: Option<PlanName>,
    pub remaining_credits: i32,
    pub total_credits: i32,
}

impl AccountDefaults {
    pub fn free_trial(credits: i32) -> Self {
        Self {
            is_paid: false,
            plan_name: Some(PlanName::FreeTrial),
            remaining_credits: credits,
            total_credits: credits,
        }
    }
}

/// Partial update of an account
///
/// `None` leaves a column untouched. Nullable columns use a nested option so
/// `Some(None)` clears them.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct AccountPatch {
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub is_paid: Option<bool>,
    #[serde(default, deserialize_with = "double_option")]
    pub plan_name: Option<Option<PlanName>>,
    #[serde(default, deserialize_with = "double_option")]
    pub billing_type: Option<Option<BillingType>>,
    #[serde(default)]
    pub remaining_credits: Option<i32>,
    #[serde(default)]
    pub total_credits: Option<i32>,
    #[serde(default, deserialize_with = "double_option")]
    pub subscription_id: Option<Option<String>>,
    #[serde(default, deserialize_with = "double_option")]
    pub customer_id: Option<Option<String>>,
    #[serde(default, deserialize_with = "double_option")]
    pub order_id: Option<Option<String>>,
}

/// A single column assignment produced from a patch
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ColumnValue {
    Bool(bool),
    Int(i32),
    Text(Option<String>),
}

impl AccountPatch {
    pub fn is_empty(&self) -> bool {
        self == &AccountPatch::default()
    }

    /// Reject balances the schema would refuse anyway
    pub fn validate(&self) -> BillingResult<()> {
        for credits in [self.remaining_credits, self.total_credits].into_iter().flatten() {
            if credits < 0 {
                return Err(BillingError::InvalidAmount(credits));
            }
        }
        Ok(())
    }

    /// Column assignments in a stable order
    pub fn columns(&self) -> Vec<(&'static str, ColumnValue)> {
        let mut cols = Vec::new();
        if let Some(email) = &self.email {
            cols.push(("email", ColumnValue::Text(Some(email.clone()))));
        }
        if let Some(is_paid) = self.is_paid {
            cols.push(("is_paid", ColumnValue::Bool(is_paid)));
        }
        if let Some(plan) = self.plan_name {
            cols.push((
                "plan_name",
                ColumnValue::Text(plan.map(|p| p.as_str().to_string())),
            ));
        }
        if let Some(billing) = self.billing_type {
            cols.push((
                "billing_type",
                ColumnValue::Text(billing.map(|b| b.as_str().to_string())),
            ));
        }
        if let Some(remaining) = self.remaining_credits {
            cols.push(("remaining_credits", ColumnValue::Int(remaining)));
        }
        if let Some(total) = self.total_credits {
            cols.push(("total_credits", ColumnValue::Int(total)));
        }
        if let Some(sub) = &self.subscription_id {
            cols.push(("subscription_id", ColumnValue::Text(sub.clone())));
        }
        if let Some(customer) = &self.customer_id {
            cols.push(("customer_id", ColumnValue::Text(customer.clone())));
        }
        if let Some(order) = &self.order_id {
            cols.push(("order_id", ColumnValue::Text(order.clone())));
        }
        cols
    }

    /// Apply the patch to an in-memory record
    pub fn apply_to(&self, account: &mut Account) {
        if let Some(email) = &self.email {
            account.email = email.clone();
        }
        if let Some(is_paid) = self.is_paid {
            account.is_paid = is_paid;
        }
        if let Some(plan) = self.plan_name {
            account.plan_name = plan;
        }
        if let Some(billing) = self.billing_type {
            account.billing_type = billing;
        }
        if let Some(remaining) = self.remaining_credits {
            account.remaining_credits = remaining;
        }
        if let Some(total) = self.total_credits {
            account.total_credits = total;
        }
        if let Some(sub) = &self.subscription_id {
            account.subscription_id = sub.clone();
        }
        if let Some(customer) = &self.customer_id {
            account.customer_id = customer.clone();
        }
        if let Some(order) = &self.order_id {
            account.order_id = order.clone();
        }
    }
}

fn double_option<'de, T, D>(de: D) -> Result<Option<Option<T>>, D::Error>
where
    T: Deserialize<'de>,
    D: Deserializer<'de>,
{
    Deserialize::deserialize(de).map(Some)
}

/// Result of a conditional debit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DebitOutcome {
    pub success: bool,
    /// Balance after the debit, or the untouched balance when it failed
    pub remaining_credits: i32,
}

/// Payment-provider references carried by grant events
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ProviderRefs {
    pub subscription_id: Option<String>,
    pub customer_id: Option<String>,
    pub order_id: Option<String>,
}

/// A resolved credit allocation ready to be written
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreditGrant {
    pub user_id: UserId,
    pub email: String,
    pub plan: PlanName,
    pub billing_type: BillingType,
    pub credits: i32,
    pub refs: ProviderRefs,
    /// Provider id of the payment behind this grant. Each key is applied to
    /// an account at most once; `None` applies unconditionally.
    pub grant_key: Option<String>,
}

/// What happened when a grant reached the store
#[derive(Debug, Clone, PartialEq)]
pub enum GrantApplication {
    Applied(Account),
    /// The grant's key was already applied to this account
    Duplicate,
}
