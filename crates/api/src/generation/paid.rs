//! Entitlement check, provider call and debit for one paid generation
//!
//! Order matters: evaluate before the provider call so broke callers never
//! cost us a request, and debit only after content exists so a failed,
//! timed-out or abandoned call never costs the caller a credit.

use nanoedit_billing::{BillingError, BillingService, CallerIdentity};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

use super::{GeneratedImage, GenerationRequest, GenerationService};
use crate::error::{ApiError, ApiResult};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateResponse {
    pub images: Vec<GeneratedImage>,
    pub text: Option<String>,
    /// Balance after the charge, `-1` for unlimited accounts
    pub remaining_credits: i32,
    pub simulated: bool,
}

#[derive(Clone)]
pub struct PaidGeneration {
    billing: Arc<BillingService>,
    generator: Arc<dyn GenerationService>,
    timeout: Duration,
}

impl PaidGeneration {
    pub fn new(
        billing: Arc<BillingService>,
        generator: Arc<dyn GenerationService>,
        timeout: Duration,
    ) -> Self {
        Self {
            billing,
            generator,
            timeout,
        }
    }

    pub fn is_simulated(&self) -> bool {
        self.generator.is_simulated()
    }

    pub async fn run(
        &self,
        identity: &CallerIdentity,
        request: &GenerationRequest,
    ) -> ApiResult<GenerateResponse> {
        request.validate().map_err(ApiError::BadRequest)?;

        self.billing.entitlements.require(identity).await?;

        let content = match tokio::time::timeout(self.timeout, self.generator.generate(request)).await
        {
            Ok(Ok(content)) if !content.is_empty() => content,
            Ok(Ok(_)) => {
                tracing::warn!(user_id = %identity.user_id, "Provider returned no content, not charging");
                return Err(ApiError::ExternalServiceFailure(
                    "no content returned".to_string(),
                ));
            }
            Ok(Err(e)) => {
                tracing::error!(user_id = %identity.user_id, error = %e, "Image generation failed, not charging");
                return Err(ApiError::ExternalServiceFailure(e.to_string()));
            }
            Err(_) => {
                tracing::error!(
                    user_id = %identity.user_id,
                    timeout_secs = self.timeout.as_secs(),
                    "Image generation timed out, not charging"
                );
                return Err(ApiError::ExternalServiceFailure(format!(
                    "timed out after {:?}",
                    self.timeout
                )));
            }
        };

        let charge = self.billing.ledger.charge_action(identity).await?;
        if !charge.success {
            // A concurrent request spent the balance after our entitlement check
            tracing::warn!(
                user_id = %identity.user_id,
                remaining_credits = charge.remaining_credits,
                "Debit lost race after generation, withholding content"
            );
            return Err(BillingError::InsufficientCredits {
                remaining: charge.remaining_credits,
                required: self.billing.ledger.credits_per_action(),
            }
            .into());
        }

        Ok(GenerateResponse {
            images: content.images,
            text: content.text,
            remaining_credits: charge.remaining_credits,
            simulated: self.generator.is_simulated(),
        })
    }
}
