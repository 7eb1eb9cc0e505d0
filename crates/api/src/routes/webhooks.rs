//! Creem webhook receiver
//!
//! No session auth here. The optional HMAC check is the only gate and
//! anything past the signature is acknowledged with 200.

use axum::{body::Bytes, extract::State, http::HeaderMap, Json};
use nanoedit_billing::webhooks::SIGNATURE_HEADER;
use nanoedit_billing::WebhookReceipt;

use crate::{error::ApiResult, state::AppState};

/// POST /api/webhooks
pub async fn receive(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<Json<WebhookReceipt>> {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok());

    state.billing.webhooks.verify_signature(&body, signature)?;

    let receipt = state.billing.webhooks.handle_payload(&body).await;
    Ok(Json(receipt))
}
