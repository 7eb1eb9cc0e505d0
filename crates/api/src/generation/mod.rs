//! Image generation
//!
//! The provider call is the expensive step of `/api/generate`. It sits behind
//! [`GenerationService`] so the server can run against OpenRouter or a local
//! simulation, chosen by `GENERATION_MODE`.

mod openrouter;
mod paid;
mod simulated;

pub use openrouter::OpenRouterGenerationService;
pub use paid::{GenerateResponse, PaidGeneration};
pub use simulated::SimulatedGenerationService;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::config::{GenerationConfig, GenerationMode};

/// An edit request: source image plus instruction
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct GenerationRequest {
    /// Data URL or https URL of the source image
    #[serde(default)]
    pub image: String,
    #[serde(default)]
    pub prompt: String,
}

impl GenerationRequest {
    pub fn validate(&self) -> Result<(), String> {
        if self.image.trim().is_empty() || self.prompt.trim().is_empty() {
            return Err("Image and prompt are required".to_string());
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageUrl {
    pub url: String,
}

/// One generated image, in the provider's `image_url` content shape
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeneratedImage {
    #[serde(rename = "type", default = "image_url_kind")]
    pub kind: String,
    pub image_url: ImageUrl,
}

fn image_url_kind() -> String {
    "image_url".to_string()
}

impl GeneratedImage {
    pub fn from_url(url: impl Into<String>) -> Self {
        Self {
            kind: image_url_kind(),
            image_url: ImageUrl { url: url.into() },
        }
    }
}

/// What the provider produced
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct GeneratedContent {
    pub images: Vec<GeneratedImage>,
    pub text: Option<String>,
}

impl GeneratedContent {
    pub fn is_empty(&self) -> bool {
        self.images.is_empty() && self.text.as_deref().map_or(true, |t| t.trim().is_empty())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum GenerationError {
    #[error("request to provider failed: {0}")]
    Request(String),

    #[error("provider returned {status}: {message}")]
    Provider { status: u16, message: String },

    #[error("provider returned no content")]
    Empty,
}

#[async_trait]
pub trait GenerationService: Send + Sync {
    async fn generate(&self, request: &GenerationRequest)
        -> Result<GeneratedContent, GenerationError>;

    /// Whether results are simulated rather than produced by a real model
    fn is_simulated(&self) -> bool {
        false
    }
}

/// Build the backend selected by configuration
pub fn from_config(config: &GenerationConfig) -> Result<Arc<dyn GenerationService>, GenerationError> {
    match config.mode {
        GenerationMode::Live => {
            tracing::info!(model = %config.model, base_url = %config.base_url, "Live image generation enabled");
            Ok(Arc::new(OpenRouterGenerationService::new(config)?))
        }
        GenerationMode::Simulated => {
            tracing::warn!("Simulated image generation enabled, no provider calls will be made");
            Ok(Arc::new(SimulatedGenerationService::new()))
        }
    }
}
