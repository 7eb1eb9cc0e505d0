//! Offline backend for local development and demos

use async_trait::async_trait;

use super::{GeneratedContent, GeneratedImage, GenerationError, GenerationRequest, GenerationService};

/// Echoes the source image back instead of calling a model
#[derive(Debug, Clone, Default)]
pub struct SimulatedGenerationService;

impl SimulatedGenerationService {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl GenerationService for SimulatedGenerationService {
    async fn generate(
        &self,
        request: &GenerationRequest,
    ) -> Result<GeneratedContent, GenerationError> {
        tracing::debug!(prompt_len = request.prompt.len(), "Simulating image generation");
        Ok(GeneratedContent {
            images: vec![GeneratedImage::from_url(request.image.clone())],
            text: Some(format!("[simulated] {}", request.prompt.trim())),
        })
    }

    fn is_simulated(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_echoes_source_image() {
        let service = SimulatedGenerationService::new();
        let request = GenerationRequest {
            image: "data:image/png;base64,AAAA".to_string(),
            prompt: " add a hat ".to_string(),
        };

        let content = service.generate(&request).await.unwrap();

        assert!(service.is_simulated());
        assert!(!content.is_empty());
        assert_eq!(content.images[0].image_url.url, "data:image/png;base64,AAAA");
        assert_eq!(content.images[0].kind, "image_url");
        assert_eq!(content.text.as_deref(), Some("[simulated] add a hat"));
    }
}
