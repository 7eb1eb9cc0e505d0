//! Application state

use nanoedit_billing::BillingService;
use std::sync::Arc;

use crate::{
    auth::{AuthState, JwtVerifier},
    config::Config,
    generation::{self, GenerationError, GenerationService, PaidGeneration},
};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub billing: Arc<BillingService>,
    pub generation: PaidGeneration,
    jwt_verifier: JwtVerifier,
}

impl AppState {
    /// Build state with the generation backend selected by configuration
    pub fn new(config: Config, billing: Arc<BillingService>) -> Result<Self, GenerationError> {
        let generator = generation::from_config(&config.generation)?;
        Ok(Self::with_generator(config, billing, generator))
    }

    pub fn with_generator(
        config: Config,
        billing: Arc<BillingService>,
        generator: Arc<dyn GenerationService>,
    ) -> Self {
        let jwt_verifier = JwtVerifier::new(&config.supabase_jwt_secret);
        let generation = PaidGeneration::new(billing.clone(), generator, config.generation.timeout);

        if billing.checkout.is_none() {
            tracing::warn!("Checkout disabled (Creem not configured)");
        }
        if !billing.webhooks.verifies_signatures() {
            tracing::warn!("Webhook signature verification disabled");
        }

        Self {
            config,
            billing,
            generation,
            jwt_verifier,
        }
    }

    /// Get auth state for middleware
    pub fn auth_state(&self) -> AuthState {
        AuthState {
            verifier: self.jwt_verifier.clone(),
            admins: self.billing.config.admins.clone(),
        }
    }
}
