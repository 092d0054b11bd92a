//! Provider profiles as they appear in configuration, and their resolved form.

use serde::{Deserialize, Serialize};

/// Supported vendor families
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderType {
    #[serde(alias = "gemini", alias = "google")]
    GoogleGenai,
    #[serde(alias = "openai", alias = "image_api")]
    OpenaiCompatible,
}

impl ProviderType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderType::GoogleGenai => "google_genai",
            ProviderType::OpenaiCompatible => "openai_compatible",
        }
    }

    /// Environment variable consulted when a profile carries no key.
    pub fn default_api_key_env(&self) -> &'static str {
        match self {
            ProviderType::GoogleGenai => "GEMINI_API_KEY",
            ProviderType::OpenaiCompatible => "OPENAI_API_KEY",
        }
    }
}

/// One named provider profile under `[text.providers.*]` or `[image.providers.*]`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProviderConfig {
    #[serde(rename = "type")]
    pub provider_type: ProviderType,

    pub model: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Name of an environment variable holding the key
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key_env: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,

    /// Allow parallel page generation (image providers)
    #[serde(default)]
    pub high_concurrency: bool,

    /// Use the short page prompt template (image providers)
    #[serde(default)]
    pub short_prompt: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_output_tokens: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aspect_ratio: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quality: Option<String>,

    /// Per-call deadline override in seconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
}

impl ProviderConfig {
    pub fn new(provider_type: ProviderType, model: impl Into<String>) -> Self {
        Self {
            provider_type,
            model: model.into(),
            api_key: None,
            api_key_env: None,
            base_url: None,
            high_concurrency: false,
            short_prompt: false,
            temperature: None,
            max_output_tokens: None,
            size: None,
            aspect_ratio: None,
            quality: None,
            timeout_secs: None,
        }
    }

    /// Validate static shape; the API key is checked at resolution time.
    pub fn validate(&self) -> Result<(), String> {
        if self.model.trim().is_empty() {
            return Err("Model name cannot be empty".to_string());
        }

        match &self.base_url {
            Some(url) if !url.starts_with("http://") && !url.starts_with("https://") => {
                return Err(format!("Invalid base_url: {}", url));
            }
            None if self.provider_type == ProviderType::OpenaiCompatible => {
                return Err("openai_compatible providers require base_url".to_string());
            }
            _ => {}
        }

        if let Some(temperature) = self.temperature {
            if !(0.0..=2.0).contains(&temperature) {
                return Err("Temperature must be between 0.0 and 2.0".to_string());
            }
        }

        Ok(())
    }

    /// Key from the profile, then `api_key_env`, then the vendor default variable.
    pub fn resolve_api_key(&self) -> Option<String> {
        if let Some(key) = self.api_key.as_ref().filter(|k| !k.trim().is_empty()) {
            return Some(key.trim().to_string());
        }
        let env_name = self
            .api_key_env
            .as_deref()
            .unwrap_or_else(|| self.provider_type.default_api_key_env());
        std::env::var(env_name)
            .ok()
            .map(|k| k.trim().to_string())
            .filter(|k| !k.is_empty())
    }
}

/// A provider profile selected as active, with its key materialised.
#[derive(Debug, Clone)]
pub struct ResolvedProvider {
    pub name: String,
    pub api_key: String,
    pub config: ProviderConfig,
}

impl ResolvedProvider {
    /// Key with all but the first and last four characters hidden.
    pub fn masked_api_key(&self) -> String {
        let chars: Vec<char> = self.api_key.chars().collect();
        if chars.len() <= 8 {
            return "*".repeat(chars.len());
        }
        let head: String = chars[..4].iter().collect();
        let tail: String = chars[chars.len() - 4..].iter().collect();
        format!("{}{}{}", head, "*".repeat(chars.len() - 8), tail)
    }
}
