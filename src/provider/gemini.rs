//! Google Gemini (`generateContent`) client for text and image generation.

use super::{
    build_provider_http_client, check_status, map_http_error, ImageData, ImageRequest,
    ModelProviderClient, TextRequest,
};
use crate::error::{ApiError, ProviderError};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com";

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest {
    contents: Vec<Content>,
    #[serde(skip_serializing_if = "Option::is_none")]
    generation_config: Option<GenerationConfig>,
}

#[derive(Serialize, Deserialize)]
struct Content {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct Part {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    inline_data: Option<InlineData>,
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InlineData {
    mime_type: String,
    data: String,
}

#[derive(Serialize, Default)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_output_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_modalities: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    image_config: Option<ImageConfig>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ImageConfig {
    aspect_ratio: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(default)]
    prompt_feedback: Option<PromptFeedback>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    #[serde(default)]
    content: Option<Content>,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
    #[serde(default)]
    block_reason: Option<String>,
}

impl GenerateContentResponse {
    fn parts(&self) -> impl Iterator<Item = &Part> {
        self.candidates
            .iter()
            .filter_map(|c| c.content.as_ref())
            .flat_map(|c| c.parts.iter())
    }

    /// First inline image part of the reply.
    fn first_image(&self) -> Result<ImageData, ProviderError> {
        let inline = self.parts().find_map(|p| p.inline_data.as_ref());
        match inline {
            Some(inline) => ImageData::from_base64(&inline.data),
            None => Err(ProviderError::InvalidResponse(self.empty_reason())),
        }
    }

    /// Describe why the reply has no usable payload.
    fn empty_reason(&self) -> String {
        if let Some(reason) = self
            .prompt_feedback
            .as_ref()
            .and_then(|f| f.block_reason.as_deref())
        {
            return format!("Prompt blocked by vendor safety filter: {}", reason);
        }
        match self.candidates.first().and_then(|c| c.finish_reason.as_deref()) {
            Some(reason) => format!("No content returned (finish reason: {})", reason),
            None => "No candidates in response".to_string(),
        }
    }
}

fn inline_part(image: &ImageData) -> Part {
    Part {
        text: None,
        inline_data: Some(InlineData {
            mime_type: image.mime_type.clone(),
            data: image.to_base64(),
        }),
    }
}

pub struct GeminiClient {
    client: Client,
    name: String,
    model: String,
    api_key: String,
    base_url: String,
}

impl GeminiClient {
    pub fn new(
        name: String,
        model: String,
        api_key: String,
        base_url: Option<String>,
    ) -> Result<Self, ApiError> {
        let client = build_provider_http_client()?;
        let base_url = base_url
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string())
            .trim_end_matches('/')
            .to_string();
        Ok(Self {
            client,
            name,
            model,
            api_key,
            base_url,
        })
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/v1beta/models/{}:generateContent",
            self.base_url, self.model
        )
    }

    async fn send(
        &self,
        request: &GenerateContentRequest,
    ) -> Result<GenerateContentResponse, ProviderError> {
        let response = self
            .client
            .post(self.endpoint())
            .header("x-goog-api-key", &self.api_key)
            .json(request)
            .send()
            .await
            .map_err(map_http_error)?;
        let response = check_status(response).await?;
        response
            .json()
            .await
            .map_err(|e| ProviderError::InvalidResponse(format!("Failed to parse response: {}", e)))
    }
}

#[async_trait]
impl ModelProviderClient for GeminiClient {
    async fn generate_text(&self, request: TextRequest) -> Result<String, ProviderError> {
        let mut parts: Vec<Part> = request.images.iter().map(inline_part).collect();
        parts.push(Part {
            text: Some(request.prompt),
            inline_data: None,
        });

        let body = GenerateContentRequest {
            contents: vec![Content {
                role: Some("user".to_string()),
                parts,
            }],
            generation_config: Some(GenerationConfig {
                temperature: request.temperature,
                max_output_tokens: request.max_output_tokens,
                ..Default::default()
            }),
        };

        let reply = self.send(&body).await?;
        let text: String = reply.parts().filter_map(|p| p.text.as_deref()).collect();
        if text.trim().is_empty() {
            return Err(ProviderError::InvalidResponse(reply.empty_reason()));
        }
        debug!(provider = %self.name, chars = text.len(), "Gemini text reply received");
        Ok(text)
    }

    async fn generate_image(&self, request: ImageRequest) -> Result<ImageData, ProviderError> {
        let mut parts: Vec<Part> = request.reference_images.iter().map(inline_part).collect();
        parts.push(Part {
            text: Some(request.prompt),
            inline_data: None,
        });

        let body = GenerateContentRequest {
            contents: vec![Content {
                role: Some("user".to_string()),
                parts,
            }],
            generation_config: Some(GenerationConfig {
                response_modalities: Some(vec!["TEXT".to_string(), "IMAGE".to_string()]),
                image_config: request
                    .aspect_ratio
                    .map(|aspect_ratio| ImageConfig { aspect_ratio }),
                ..Default::default()
            }),
        };

        let reply = self.send(&body).await?;
        reply.first_image()
    }

    fn provider_name(&self) -> &str {
        &self.name
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}
