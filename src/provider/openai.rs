//! OpenAI-compatible client: chat completions for text, images API for pictures.
//!
//! Works against OpenAI itself and the many relays that mirror its routes.

use super::{
    build_provider_http_client, check_status, map_http_error, ImageData, ImageRequest,
    ModelProviderClient, TextRequest,
};
use crate::error::{ApiError, ProviderError};
use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Inline bytes save a second round-trip; `url` replies are still downloaded.
const IMAGE_RESPONSE_FORMAT: &str = "b64_json";

#[derive(Serialize)]
struct ChatCompletionRequest {
    model: String,
    messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
}

#[derive(Serialize)]
struct ChatMessage {
    role: &'static str,
    content: Vec<ContentPart>,
}

#[derive(Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentPart {
    Text { text: String },
    ImageUrl { image_url: ImageUrl },
}

#[derive(Serialize)]
struct ImageUrl {
    url: String,
}

#[derive(Deserialize)]
struct ChatCompletionResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Serialize)]
struct ImageGenerationRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    n: u32,
    response_format: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    size: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    quality: Option<&'a str>,
}

#[derive(Deserialize)]
struct ImageGenerationResponse {
    #[serde(default)]
    data: Vec<ImageDatum>,
}

#[derive(Deserialize)]
struct ImageDatum {
    #[serde(default)]
    b64_json: Option<String>,
    #[serde(default)]
    url: Option<String>,
}

pub struct OpenAiCompatibleClient {
    client: Client,
    name: String,
    model: String,
    api_key: String,
    api_base: String,
}

impl OpenAiCompatibleClient {
    pub fn new(
        name: String,
        model: String,
        api_key: String,
        base_url: String,
    ) -> Result<Self, ApiError> {
        let client = build_provider_http_client()?;
        Ok(Self {
            client,
            name,
            model,
            api_key,
            api_base: normalize_api_base(&base_url),
        })
    }

    async fn decode_image_reply(
        &self,
        response: reqwest::Response,
    ) -> Result<ImageData, ProviderError> {
        let reply: ImageGenerationResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::InvalidResponse(format!("Failed to parse response: {}", e)))?;

        let datum = reply
            .data
            .into_iter()
            .next()
            .ok_or_else(|| ProviderError::InvalidResponse("No image in response".to_string()))?;

        if let Some(encoded) = datum.b64_json {
            return ImageData::from_base64(&encoded);
        }
        match datum.url {
            Some(url) => self.download(&url).await,
            None => Err(ProviderError::InvalidResponse(
                "Image entry has neither b64_json nor url".to_string(),
            )),
        }
    }

    async fn download(&self, url: &str) -> Result<ImageData, ProviderError> {
        debug!(provider = %self.name, url, "Downloading generated image");
        let response = self.client.get(url).send().await.map_err(map_http_error)?;
        let response = check_status(response).await?;
        let bytes = response.bytes().await.map_err(map_http_error)?;
        if bytes.is_empty() {
            return Err(ProviderError::InvalidResponse(
                "Downloaded image is empty".to_string(),
            ));
        }
        Ok(ImageData::new(bytes.to_vec()))
    }

    fn edit_form(&self, request: &ImageRequest) -> Result<Form, ProviderError> {
        let mut form = Form::new()
            .text("model", self.model.clone())
            .text("prompt", request.prompt.clone())
            .text("n", "1");
        if let Some(size) = &request.size {
            form = form.text("size", size.clone());
        }
        if let Some(quality) = &request.quality {
            form = form.text("quality", quality.clone());
        }
        for (i, image) in request.reference_images.iter().enumerate() {
            let extension = image.mime_type.rsplit('/').next().unwrap_or("png");
            let part = Part::bytes(image.bytes.clone())
                .file_name(format!("reference_{}.{}", i, extension))
                .mime_str(&image.mime_type)
                .map_err(map_http_error)?;
            form = form.part("image[]", part);
        }
        Ok(form)
    }
}

/// Accept base URLs with or without a trailing `/v1`.
fn normalize_api_base(base_url: &str) -> String {
    let trimmed = base_url.trim().trim_end_matches('/');
    if trimmed.ends_with("/v1") {
        trimmed.to_string()
    } else {
        format!("{}/v1", trimmed)
    }
}

#[async_trait]
impl ModelProviderClient for OpenAiCompatibleClient {
    async fn generate_text(&self, request: TextRequest) -> Result<String, ProviderError> {
        let mut content = vec![ContentPart::Text {
            text: request.prompt,
        }];
        content.extend(request.images.iter().map(|image| ContentPart::ImageUrl {
            image_url: ImageUrl {
                url: image.data_url(),
            },
        }));

        let body = ChatCompletionRequest {
            model: self.model.clone(),
            messages: vec![ChatMessage {
                role: "user",
                content,
            }],
            temperature: request.temperature,
            max_tokens: request.max_output_tokens,
        };

        let response = self
            .client
            .post(format!("{}/chat/completions", self.api_base))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(map_http_error)?;
        let response = check_status(response).await?;

        let completion: ChatCompletionResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::InvalidResponse(format!("Failed to parse response: {}", e)))?;

        completion
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .filter(|text| !text.trim().is_empty())
            .ok_or_else(|| ProviderError::InvalidResponse("No choices in response".to_string()))
    }

    async fn generate_image(&self, request: ImageRequest) -> Result<ImageData, ProviderError> {
        let response = if request.reference_images.is_empty() {
            let body = ImageGenerationRequest {
                model: &self.model,
                prompt: &request.prompt,
                n: 1,
                response_format: IMAGE_RESPONSE_FORMAT,
                size: request.size.as_deref(),
                quality: request.quality.as_deref(),
            };
            self.client
                .post(format!("{}/images/generations", self.api_base))
                .bearer_auth(&self.api_key)
                .json(&body)
                .send()
                .await
                .map_err(map_http_error)?
        } else {
            let form = self.edit_form(&request)?;
            self.client
                .post(format!("{}/images/edits", self.api_base))
                .bearer_auth(&self.api_key)
                .multipart(form)
                .send()
                .await
                .map_err(map_http_error)?
        };

        let response = check_status(response).await?;
        self.decode_image_reply(response).await
    }

    fn provider_name(&self) -> &str {
        &self.name
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}
