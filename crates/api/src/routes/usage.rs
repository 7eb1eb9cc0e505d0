//! Usage route: the caller's entitlement as the web app displays it

use axum::{extract::State, Extension, Json};
use nanoedit_billing::Entitlement;
use nanoedit_shared::{BillingType, PlanName};
use serde::Serialize;

use crate::{auth::AuthUser, error::ApiResult, state::AppState};

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageResponse {
    pub can_generate: bool,
    pub is_admin: bool,
    pub is_paid: bool,
    pub remaining_credits: i32,
    pub total_credits: i32,
    pub remaining_generations: Option<i32>,
    pub plan_name: Option<PlanName>,
    pub billing_type: Option<BillingType>,
    pub message: String,
    pub simulated: bool,
}

impl UsageResponse {
    fn new(entitlement: Entitlement, simulated: bool) -> Self {
        Self {
            can_generate: entitlement.can_perform,
            is_admin: entitlement.is_admin,
            is_paid: entitlement.is_paid,
            remaining_credits: entitlement.remaining_credits,
            total_credits: entitlement.total_credits,
            remaining_generations: entitlement.remaining_generations,
            plan_name: entitlement.plan_name,
            billing_type: entitlement.billing_type,
            message: entitlement.reason,
            simulated,
        }
    }
}

/// GET /api/usage
pub async fn get_usage(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
) -> ApiResult<Json<UsageResponse>> {
    let entitlement = state
        .billing
        .entitlements
        .evaluate(&auth_user.identity())
        .await?;

    Ok(Json(UsageResponse::new(
        entitlement,
        state.generation.is_simulated(),
    )))
}
