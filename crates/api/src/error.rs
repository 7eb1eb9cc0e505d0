//! API error types

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use nanoedit_billing::BillingError;
use serde_json::json;

pub type ApiResult<T> = Result<T, ApiError>;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),

    #[error("Authentication required")]
    Unauthorized,

    #[error("Insufficient permissions")]
    Forbidden,

    /// The image-generation provider failed, timed out or returned nothing
    #[error("Image generation failed: {0}")]
    ExternalServiceFailure(String),

    #[error(transparent)]
    Billing(#[from] BillingError),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden => StatusCode::FORBIDDEN,
            ApiError::ExternalServiceFailure(_) => StatusCode::BAD_GATEWAY,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::Billing(e) => match e {
                BillingError::Unauthenticated => StatusCode::UNAUTHORIZED,
                BillingError::MissingEmail => StatusCode::BAD_REQUEST,
                BillingError::StoreUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
                BillingError::NotFound(_) => StatusCode::NOT_FOUND,
                BillingError::InsufficientCredits { .. } => StatusCode::PAYMENT_REQUIRED,
                BillingError::InvalidAmount(_) => StatusCode::BAD_REQUEST,
                BillingError::MalformedEvent(_) => StatusCode::BAD_REQUEST,
                BillingError::WebhookSignatureInvalid => StatusCode::UNAUTHORIZED,
                BillingError::PlanUnavailable(_) => StatusCode::BAD_REQUEST,
                BillingError::CheckoutFailed(_) => StatusCode::BAD_GATEWAY,
                BillingError::PaymentsNotConfigured => StatusCode::SERVICE_UNAVAILABLE,
                BillingError::Configuration(_) | BillingError::Internal(_) => {
                    StatusCode::INTERNAL_SERVER_ERROR
                }
            },
        }
    }

    /// Message safe to show a client
    fn public_message(&self) -> String {
        match self {
            ApiError::Internal(_)
            | ApiError::Billing(BillingError::Internal(_))
            | ApiError::Billing(BillingError::Configuration(_)) => {
                "Internal server error".to_string()
            }
            ApiError::Billing(BillingError::StoreUnavailable(_)) => {
                "Account service temporarily unavailable. Please try again.".to_string()
            }
            ApiError::Billing(BillingError::InsufficientCredits { .. }) => {
                "Insufficient credits. Please upgrade to continue.".to_string()
            }
            other => other.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();

        if status.is_server_error() {
            tracing::error!(status = status.as_u16(), error = %self, "Request failed");
        } else {
            tracing::debug!(status = status.as_u16(), error = %self, "Request rejected");
        }

        let mut body = json!({
            "error": self.public_message(),
            "code": status.as_u16(),
        });
        if let ApiError::Billing(BillingError::InsufficientCredits {
            remaining,
            required,
        }) = &self
        {
            body["remainingCredits"] = json!(remaining);
            body["requiredCredits"] = json!(required);
        }

        (status, Json(body)).into_response()
    }
}
