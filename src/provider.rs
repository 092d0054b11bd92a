//! Model Provider Abstraction
//!
//! One two-operation contract (`generate_text`, `generate_image`) over every text and
//! image vendor. Vendors form a closed set of [`ProviderClient`] variants selected once
//! when configuration is resolved; callers never see vendor request shapes or errors.

use crate::error::{ApiError, ProviderError, StorageError};
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use reqwest::Client;
use std::future::Future;
use std::path::Path;
use std::time::Duration;

pub mod gemini;
pub mod openai;
pub mod profile;

pub use gemini::GeminiClient;
pub use openai::OpenAiCompatibleClient;
pub use profile::{ProviderConfig, ProviderType, ResolvedProvider};

/// Raw image payload exchanged with vendors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageData {
    pub bytes: Vec<u8>,
    pub mime_type: String,
}

impl ImageData {
    /// Wrap bytes, detecting the mime type from magic numbers.
    pub fn new(bytes: Vec<u8>) -> Self {
        let mime_type = sniff_mime_type(&bytes).to_string();
        Self { bytes, mime_type }
    }

    pub fn from_file(path: &Path) -> Result<Self, StorageError> {
        let bytes = std::fs::read(path)?;
        Ok(Self::new(bytes))
    }

    pub fn from_base64(encoded: &str) -> Result<Self, ProviderError> {
        let bytes = BASE64
            .decode(encoded.trim())
            .map_err(|e| ProviderError::InvalidResponse(format!("Invalid base64 image: {}", e)))?;
        if bytes.is_empty() {
            return Err(ProviderError::InvalidResponse(
                "Image payload is empty".to_string(),
            ));
        }
        Ok(Self::new(bytes))
    }

    pub fn to_base64(&self) -> String {
        BASE64.encode(&self.bytes)
    }

    pub fn data_url(&self) -> String {
        format!("data:{};base64,{}", self.mime_type, self.to_base64())
    }
}

fn sniff_mime_type(bytes: &[u8]) -> &'static str {
    if bytes.starts_with(&[0x89, b'P', b'N', b'G']) {
        "image/png"
    } else if bytes.starts_with(&[0xFF, 0xD8]) {
        "image/jpeg"
    } else if bytes.len() >= 12 && &bytes[0..4] == b"RIFF" && &bytes[8..12] == b"WEBP" {
        "image/webp"
    } else if bytes.starts_with(b"GIF8") {
        "image/gif"
    } else {
        "image/png"
    }
}

/// Text generation request
#[derive(Debug, Clone, Default)]
pub struct TextRequest {
    pub prompt: String,
    /// Optional grounding images sent alongside the prompt
    pub images: Vec<ImageData>,
    pub temperature: Option<f32>,
    pub max_output_tokens: Option<u32>,
}

impl TextRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            ..Default::default()
        }
    }

    pub fn with_images(mut self, images: Vec<ImageData>) -> Self {
        self.images = images;
        self
    }

    pub fn with_max_output_tokens(mut self, max_output_tokens: u32) -> Self {
        self.max_output_tokens = Some(max_output_tokens);
        self
    }
}

/// Image generation request
#[derive(Debug, Clone, Default)]
pub struct ImageRequest {
    pub prompt: String,
    pub reference_images: Vec<ImageData>,
    /// Pixel size such as `1024x1536` (OpenAI-compatible vendors)
    pub size: Option<String>,
    /// Aspect ratio such as `3:4` (Gemini)
    pub aspect_ratio: Option<String>,
    pub quality: Option<String>,
}

impl ImageRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            ..Default::default()
        }
    }
}

/// Vendor-agnostic generation contract.
///
/// Implementations never retry; a failed call is reported once and the caller decides
/// what to do with it.
#[async_trait]
pub trait ModelProviderClient: Send + Sync {
    async fn generate_text(&self, request: TextRequest) -> Result<String, ProviderError>;

    async fn generate_image(&self, request: ImageRequest) -> Result<ImageData, ProviderError>;

    fn provider_name(&self) -> &str;

    fn model_name(&self) -> &str;
}

/// Closed set of supported vendors.
pub enum ProviderClient {
    Gemini(GeminiClient),
    OpenAiCompatible(OpenAiCompatibleClient),
}

#[async_trait]
impl ModelProviderClient for ProviderClient {
    async fn generate_text(&self, request: TextRequest) -> Result<String, ProviderError> {
        match self {
            ProviderClient::Gemini(client) => client.generate_text(request).await,
            ProviderClient::OpenAiCompatible(client) => client.generate_text(request).await,
        }
    }

    async fn generate_image(&self, request: ImageRequest) -> Result<ImageData, ProviderError> {
        match self {
            ProviderClient::Gemini(client) => client.generate_image(request).await,
            ProviderClient::OpenAiCompatible(client) => client.generate_image(request).await,
        }
    }

    fn provider_name(&self) -> &str {
        match self {
            ProviderClient::Gemini(client) => client.provider_name(),
            ProviderClient::OpenAiCompatible(client) => client.provider_name(),
        }
    }

    fn model_name(&self) -> &str {
        match self {
            ProviderClient::Gemini(client) => client.model_name(),
            ProviderClient::OpenAiCompatible(client) => client.model_name(),
        }
    }
}

pub struct ProviderFactory;

impl ProviderFactory {
    pub fn create_client(provider: &ResolvedProvider) -> Result<ProviderClient, ApiError> {
        match provider.config.provider_type {
            ProviderType::GoogleGenai => Ok(ProviderClient::Gemini(GeminiClient::new(
                provider.name.clone(),
                provider.config.model.clone(),
                provider.api_key.clone(),
                provider.config.base_url.clone(),
            )?)),
            ProviderType::OpenaiCompatible => {
                let base_url = provider.config.base_url.clone().ok_or_else(|| {
                    ApiError::ConfigError(format!(
                        "Provider '{}' of type openai_compatible requires base_url",
                        provider.name
                    ))
                })?;
                Ok(ProviderClient::OpenAiCompatible(OpenAiCompatibleClient::new(
                    provider.name.clone(),
                    provider.config.model.clone(),
                    provider.api_key.clone(),
                    base_url,
                )?))
            }
        }
    }
}

/// Bound a provider call by a caller-supplied deadline.
pub async fn with_deadline<T, F>(timeout: Duration, call: F) -> Result<T, ProviderError>
where
    F: Future<Output = Result<T, ProviderError>>,
{
    match tokio::time::timeout(timeout, call).await {
        Ok(result) => result,
        Err(_) => Err(ProviderError::Timeout(format!(
            "No response within {}s",
            timeout.as_secs_f64()
        ))),
    }
}

const PROVIDER_HTTP_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const PROVIDER_HTTP_REQUEST_TIMEOUT: Duration = Duration::from_secs(600);

pub(crate) fn build_provider_http_client() -> Result<Client, ApiError> {
    Client::builder()
        .connect_timeout(PROVIDER_HTTP_CONNECT_TIMEOUT)
        .timeout(PROVIDER_HTTP_REQUEST_TIMEOUT)
        .build()
        .map_err(|e| ApiError::ConfigError(format!("Failed to create HTTP client: {}", e)))
}

pub(crate) fn map_http_error(error: reqwest::Error) -> ProviderError {
    if let Some(status) = error.status() {
        status_error(status.as_u16(), &error.to_string())
    } else if error.is_timeout() {
        ProviderError::Timeout(format!("Request timeout: {}", error))
    } else if error.is_connect() || error.is_request() {
        ProviderError::Network(format!("Connection error: {}", error))
    } else if error.is_decode() || error.is_body() {
        ProviderError::InvalidResponse(format!("Failed to read response: {}", error))
    } else {
        ProviderError::Network(format!("HTTP error: {}", error))
    }
}

/// Map a non-success HTTP status plus its body onto the error taxonomy.
pub(crate) fn status_error(status: u16, body: &str) -> ProviderError {
    let detail = truncate(body, 300);
    match status {
        401 | 403 => ProviderError::Auth(format!("Authentication failed ({}): {}", status, detail)),
        429 => ProviderError::RateLimited(format!("Rate limit exceeded: {}", detail)),
        408 | 504 => ProviderError::Timeout(format!("Upstream timeout ({}): {}", status, detail)),
        _ => classify_error_text(body).unwrap_or_else(|| {
            if status >= 500 {
                ProviderError::Network(format!("Upstream unavailable ({}): {}", status, detail))
            } else {
                ProviderError::InvalidResponse(format!(
                    "Request rejected ({}): {}",
                    status, detail
                ))
            }
        }),
    }
}

const RATE_LIMIT_MARKERS: &[&str] = &["quota", "resource_exhausted", "rate limit", "too many requests"];
const AUTH_MARKERS: &[&str] = &["api key", "api_key", "permission", "unauthenticated", "unauthorized"];

/// Vendors frequently report quota and credential problems as 400s; recognise them by text.
pub(crate) fn classify_error_text(text: &str) -> Option<ProviderError> {
    let lower = text.to_lowercase();
    let detail = truncate(text, 300);
    if RATE_LIMIT_MARKERS.iter().any(|m| lower.contains(m)) {
        Some(ProviderError::RateLimited(detail))
    } else if AUTH_MARKERS.iter().any(|m| lower.contains(m)) {
        Some(ProviderError::Auth(detail))
    } else {
        None
    }
}

fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        text.to_string()
    } else {
        let head: String = text.chars().take(max_chars).collect();
        format!("{}...", head)
    }
}

/// Read a non-success response body and map it; success responses pass through.
pub(crate) async fn check_status(
    response: reqwest::Response,
) -> Result<reqwest::Response, ProviderError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response
        .text()
        .await
        .unwrap_or_else(|_| "Unknown error".to_string());
    Err(status_error(status.as_u16(), &body))
}
