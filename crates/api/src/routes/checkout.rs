//! Plan checkout

use axum::{extract::State, Extension, Json};
use nanoedit_billing::CheckoutSession;
use nanoedit_shared::{BillingType, PlanName};
use serde::Deserialize;

use crate::{
    auth::AuthUser,
    error::{ApiError, ApiResult},
    state::AppState,
};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutRequest {
    #[serde(alias = "planName")]
    pub plan: String,
    #[serde(default)]
    pub billing_type: Option<String>,
}

/// POST /api/checkout
pub async fn create_checkout(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Json(req): Json<CheckoutRequest>,
) -> ApiResult<Json<CheckoutSession>> {
    let plan: PlanName = req
        .plan
        .parse()
        .map_err(|e: nanoedit_shared::UnknownVariant| ApiError::BadRequest(e.to_string()))?;
    let billing_type = match req.billing_type.as_deref() {
        Some(raw) => raw
            .parse::<BillingType>()
            .map_err(|e| ApiError::BadRequest(e.to_string()))?,
        None => BillingType::Monthly,
    };

    let session = state
        .billing
        .checkout()?
        .create_checkout(&auth_user.identity(), plan, billing_type)
        .await?;

    Ok(Json(session))
}
