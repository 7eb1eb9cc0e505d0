//! Common types used across NanoEdit

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

// =============================================================================
// ID Wrappers
// =============================================================================

/// User ID wrapper
///
/// Issued by the identity provider and never changed by this system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(transparent)]
#[sqlx(transparent)]
pub struct UserId(pub Uuid);

impl UserId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for UserId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<Uuid> for UserId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

impl FromStr for UserId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s.trim()).map(Self)
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Error returned when a plan or billing type string is not recognised
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown {kind}: {value}")]
pub struct UnknownVariant {
    pub kind: &'static str,
    pub value: String,
}

// =============================================================================
// Plans
// =============================================================================

/// Plan an account is on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PlanName {
    #[serde(rename = "Free Trial")]
    FreeTrial,
    Basic,
    Pro,
    Max,
    Admin,
}

impl PlanName {
    /// Plans that can be bought through checkout
    pub const PURCHASABLE: [PlanName; 3] = [PlanName::Basic, PlanName::Pro, PlanName::Max];

    pub fn as_str(&self) -> &'static str {
        match self {
            PlanName::FreeTrial => "Free Trial",
            PlanName::Basic => "Basic",
            PlanName::Pro => "Pro",
            PlanName::Max => "Max",
            PlanName::Admin => "Admin",
        }
    }

    pub fn is_purchasable(&self) -> bool {
        Self::PURCHASABLE.contains(self)
    }
}

impl fmt::Display for PlanName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PlanName {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "free trial" | "free_trial" | "free" => Ok(PlanName::FreeTrial),
            "basic" => Ok(PlanName::Basic),
            "pro" => Ok(PlanName::Pro),
            "max" => Ok(PlanName::Max),
            "admin" => Ok(PlanName::Admin),
            _ => Err(UnknownVariant {
                kind: "plan",
                value: s.to_string(),
            }),
        }
    }
}

/// Billing cadence of a paid plan
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BillingType {
    Monthly,
    Yearly,
}

impl BillingType {
    pub const ALL: [BillingType; 2] = [BillingType::Monthly, BillingType::Yearly];

    pub fn as_str(&self) -> &'static str {
        match self {
            BillingType::Monthly => "monthly",
            BillingType::Yearly => "yearly",
        }
    }
}

impl fmt::Display for BillingType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BillingType {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "monthly" | "month" => Ok(BillingType::Monthly),
            "yearly" | "year" | "annual" => Ok(BillingType::Yearly),
            _ => Err(UnknownVariant {
                kind: "billing type",
                value: s.to_string(),
            }),
        }
    }
}
