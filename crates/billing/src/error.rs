//! Billing error types

use nanoedit_shared::UserId;

pub type BillingResult<T> = Result<T, BillingError>;

#[derive(Debug, thiserror::Error)]
pub enum BillingError {
    #[error("No authenticated identity")]
    Unauthenticated,

    #[error("User email not found")]
    MissingEmail,

    #[error("Account store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("Account not found: {0}")]
    NotFound(UserId),

    #[error("Insufficient credits: {remaining} remaining, {required} required")]
    InsufficientCredits { remaining: i32, required: i32 },

    #[error("Invalid credit amount: {0}")]
    InvalidAmount(i32),

    #[error("Malformed payment event: {0}")]
    MalformedEvent(String),

    #[error("Invalid webhook signature")]
    WebhookSignatureInvalid,

    #[error("Checkout failed: {0}")]
    CheckoutFailed(String),

    #[error("Plan not available for purchase: {0}")]
    PlanUnavailable(String),

    #[error("Payments are not configured")]
    PaymentsNotConfigured,

    #[error("Billing configuration error: {0}")]
    Configuration(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl BillingError {
    /// Whether retrying the same request could succeed without user action
    pub fn is_retryable(&self) -> bool {
        matches!(self, BillingError::StoreUnavailable(_))
    }
}

impl From<sqlx::Error> for BillingError {
    fn from(e: sqlx::Error) -> Self {
        match e {
            sqlx::Error::Io(_)
            | sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::WorkerCrashed
            | sqlx::Error::Tls(_)
            | sqlx::Error::Protocol(_) => BillingError::StoreUnavailable(e.to_string()),
            other => BillingError::Internal(format!("database error: {}", other)),
        }
    }
}
