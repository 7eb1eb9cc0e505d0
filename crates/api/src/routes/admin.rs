//! Admin routes
//!
//! Gated by the admin email allowlist. Support staff use these to inspect the
//! ledger and correct individual accounts.

use axum::{
    extract::{Extension, Path, Query, State},
    Json,
};
use nanoedit_billing::{Account, AccountPatch, InvariantCheckSummary, InvariantChecker};
use nanoedit_shared::UserId;
use serde::{Deserialize, Serialize};

use crate::{
    auth::AuthUser,
    error::{ApiError, ApiResult},
    state::AppState,
};

#[derive(Debug, Deserialize)]
pub struct InvariantQuery {
    /// Run only this check
    pub check: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum InvariantResponse {
    Summary(InvariantCheckSummary),
    Single {
        check: String,
        violations: Vec<nanoedit_billing::InvariantViolation>,
    },
}

/// GET /api/admin/billing/invariants
pub async fn run_invariants(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Query(query): Query<InvariantQuery>,
) -> ApiResult<Json<InvariantResponse>> {
    tracing::info!(admin_id = %auth_user.user_id, check = ?query.check, "Running ledger invariant checks");

    match query.check {
        Some(check) => {
            if !InvariantChecker::available_checks().contains(&check.as_str()) {
                return Err(ApiError::BadRequest(format!(
                    "Unknown check '{}'. Available: {}",
                    check,
                    InvariantChecker::available_checks().join(", ")
                )));
            }
            let violations = state.billing.invariants.run_check(&check).await?;
            Ok(Json(InvariantResponse::Single { check, violations }))
        }
        None => Ok(Json(InvariantResponse::Summary(
            state.billing.invariants.run_all_checks().await?,
        ))),
    }
}

fn parse_user_id(raw: &str) -> ApiResult<UserId> {
    raw.parse()
        .map_err(|_| ApiError::BadRequest(format!("Invalid user id '{}'", raw)))
}

/// GET /api/admin/accounts/{user_id}
pub async fn get_account(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> ApiResult<Json<Account>> {
    let user_id = parse_user_id(&user_id)?;
    Ok(Json(state.billing.store.get(user_id).await?))
}

/// PATCH /api/admin/accounts/{user_id}
///
/// With an `email` in the body a missing account is created, otherwise the
/// account must already exist.
pub async fn patch_account(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Path(user_id): Path<String>,
    Json(patch): Json<AccountPatch>,
) -> ApiResult<Json<Account>> {
    let user_id = parse_user_id(&user_id)?;
    if patch.is_empty() {
        return Err(ApiError::BadRequest("No fields to update".to_string()));
    }
    patch.validate()?;

    let store = &state.billing.store;
    let account = match patch.email.as_deref().map(str::trim) {
        Some(email) if !email.is_empty() => store.upsert(user_id, email, &patch).await?,
        Some(_) => return Err(ApiError::BadRequest("email must not be blank".to_string())),
        None => store.update(user_id, &patch).await?,
    };

    tracing::info!(
        admin_id = %auth_user.user_id,
        user_id = %user_id,
        remaining_credits = account.remaining_credits,
        total_credits = account.total_credits,
        is_paid = account.is_paid,
        "Admin adjusted account"
    );

    Ok(Json(account))
}
