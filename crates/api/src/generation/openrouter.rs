//! OpenRouter chat-completions backend

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

use super::{GeneratedContent, GeneratedImage, GenerationError, GenerationRequest, GenerationService};
use crate::config::GenerationConfig;

const APP_TITLE: &str = "NanoEdit AI Image Editor";

pub struct OpenRouterGenerationService {
    http: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
    referer: String,
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: Option<Message>,
}

#[derive(Debug, Deserialize)]
struct Message {
    content: Option<String>,
    #[serde(default)]
    images: Vec<GeneratedImage>,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorDetails,
}

#[derive(Debug, Deserialize)]
struct ErrorDetails {
    message: String,
}

impl OpenRouterGenerationService {
    /// The HTTP client gives up after the configured generation timeout
    pub fn new(config: &GenerationConfig) -> Result<Self, GenerationError> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| GenerationError::Request(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            http,
            api_key: config.api_key.clone(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            referer: config.app_url.clone(),
        })
    }
}

#[async_trait]
impl GenerationService for OpenRouterGenerationService {
    async fn generate(
        &self,
        request: &GenerationRequest,
    ) -> Result<GeneratedContent, GenerationError> {
        let body = json!({
            "model": self.model,
            "modalities": ["image", "text"],
            "messages": [{
                "role": "user",
                "content": [
                    { "type": "text", "text": request.prompt },
                    { "type": "image_url", "image_url": { "url": request.image } }
                ]
            }]
        });

        tracing::debug!(model = %self.model, prompt_len = request.prompt.len(), "Calling image provider");

        let resp = self
            .http
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .header("HTTP-Referer", &self.referer)
            .header("X-Title", APP_TITLE)
            .json(&body)
            .send()
            .await
            .map_err(|e| GenerationError::Request(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            let message = serde_json::from_str::<ErrorEnvelope>(&text)
                .map(|e| e.error.message)
                .unwrap_or(text);
            return Err(GenerationError::Provider {
                status: status.as_u16(),
                message,
            });
        }

        let completion: CompletionResponse = resp
            .json()
            .await
            .map_err(|e| GenerationError::Request(format!("unreadable response: {}", e)))?;

        let message = completion
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message)
            .ok_or(GenerationError::Empty)?;

        let content = GeneratedContent {
            images: message.images,
            text: message.content.filter(|t| !t.trim().is_empty()),
        };
        if content.is_empty() {
            return Err(GenerationError::Empty);
        }

        tracing::info!(images = content.images.len(), "Image provider returned content");
        Ok(content)
    }
}
