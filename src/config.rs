//! Configuration System
//!
//! Layered configuration built with the `config` crate: built-in defaults, the global
//! file, the workspace `config/config.toml` and `config/{NOTECRAFT_ENV}.toml`. An
//! explicit file replaces the file layers. Text and image providers are separate named
//! tables, each with one active entry.

use crate::error::ApiError;
use crate::generation::{
    ConcurrencyMode, CoordinatorSettings, ImageOptions, DEFAULT_RETAINED_TASKS, MAX_CONCURRENCY,
};
use crate::logging::LoggingConfig;
use crate::prompt::PagePromptTemplate;
use crate::stage::StageOptions;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

pub use crate::provider::{ProviderConfig, ProviderType, ResolvedProvider};

mod merge {
    pub mod merge_policy;
}
mod sources {
    pub mod global_file;
    pub mod workspace_file;
}

pub use sources::global_file::global_config_path;

/// Root configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Text providers (outline, content, concept steps)
    #[serde(default)]
    pub text: ProviderSection,

    /// Image providers (page and concept images)
    #[serde(default)]
    pub image: ProviderSection,

    #[serde(default)]
    pub generation: GenerationConfig,

    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Named provider profiles plus the one in use.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProviderSection {
    #[serde(default)]
    pub active_provider: String,

    #[serde(default)]
    pub providers: BTreeMap<String, ProviderConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationConfig {
    /// Cap on concurrent image jobs when the image provider allows high concurrency
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,

    /// Deadline for one image call
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// Deadline for one text call
    #[serde(default = "default_text_timeout")]
    pub text_timeout_secs: u64,

    /// Pass the cover image to later pages
    #[serde(default = "default_true")]
    pub use_reference: bool,

    /// Tasks whose state is kept for retries; the oldest is dropped beyond this
    #[serde(default = "default_retained_tasks")]
    pub retained_tasks: usize,
}

fn default_max_concurrency() -> usize {
    MAX_CONCURRENCY
}

fn default_request_timeout() -> u64 {
    300
}

fn default_text_timeout() -> u64 {
    120
}

fn default_retained_tasks() -> usize {
    DEFAULT_RETAINED_TASKS
}

fn default_true() -> bool {
    true
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            max_concurrency: default_max_concurrency(),
            request_timeout_secs: default_request_timeout(),
            text_timeout_secs: default_text_timeout(),
            use_reference: true,
            retained_tasks: default_retained_tasks(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// History records and generated images (`{history_dir}/{task_id}/`)
    #[serde(default = "default_history_dir")]
    pub history_dir: PathBuf,

    /// Knowledge overrides for the concept pipeline
    #[serde(default = "default_knowledge_dir")]
    pub knowledge_dir: PathBuf,
}

fn default_history_dir() -> PathBuf {
    PathBuf::from("history")
}

fn default_knowledge_dir() -> PathBuf {
    PathBuf::from("knowledge")
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            history_dir: default_history_dir(),
            knowledge_dir: default_knowledge_dir(),
        }
    }
}

impl StorageConfig {
    /// Relative paths are taken from `workspace_root`.
    pub fn resolve(&self, workspace_root: &Path) -> StorageConfig {
        let absolute = |path: &Path| {
            if path.is_absolute() {
                path.to_path_buf()
            } else {
                workspace_root.join(path)
            }
        };
        StorageConfig {
            history_dir: absolute(&self.history_dir),
            knowledge_dir: absolute(&self.knowledge_dir),
        }
    }
}

/// Configuration validation errors
#[derive(Debug, Clone, PartialEq)]
pub enum ValidationError {
    /// (section, provider name, message)
    Provider(String, String, String),
    Section(String, String),
    Generation(String),
    Storage(String),
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ValidationError::Provider(section, name, msg) => {
                write!(f, "{} provider '{}': {}", section, name, msg)
            }
            ValidationError::Section(section, msg) => write!(f, "[{}]: {}", section, msg),
            ValidationError::Generation(msg) => write!(f, "[generation]: {}", msg),
            ValidationError::Storage(msg) => write!(f, "[storage]: {}", msg),
        }
    }
}

impl std::error::Error for ValidationError {}

impl ProviderSection {
    fn validate(&self, section: &str, errors: &mut Vec<ValidationError>) {
        for (name, provider) in &self.providers {
            if let Err(e) = provider.validate() {
                errors.push(ValidationError::Provider(section.to_string(), name.clone(), e));
            }
        }
        if !self.active_provider.is_empty() && !self.providers.contains_key(&self.active_provider) {
            errors.push(ValidationError::Section(
                section.to_string(),
                format!(
                    "active_provider '{}' is not configured",
                    self.active_provider
                ),
            ));
        }
    }

    /// Active profile with its API key resolved.
    pub fn resolve(&self, section: &str) -> Result<ResolvedProvider, ApiError> {
        if self.providers.is_empty() {
            return Err(ApiError::ConfigError(format!(
                "No {} providers configured; add [{}.providers.<name>] to config.toml",
                section, section
            )));
        }

        let name = self.active_provider.trim();
        if name.is_empty() {
            return Err(ApiError::ConfigError(format!(
                "No active {} provider selected; set [{}].active_provider",
                section, section
            )));
        }

        let config = self.providers.get(name).ok_or_else(|| {
            let available: Vec<&str> = self.providers.keys().map(String::as_str).collect();
            ApiError::ConfigError(format!(
                "{} provider '{}' not found; available: {}",
                section,
                name,
                available.join(", ")
            ))
        })?;

        config.validate().map_err(|e| {
            ApiError::ConfigError(format!("{} provider '{}': {}", section, name, e))
        })?;

        let api_key = config.resolve_api_key().ok_or_else(|| {
            let env_name = config
                .api_key_env
                .as_deref()
                .unwrap_or_else(|| config.provider_type.default_api_key_env());
            ApiError::ConfigError(format!(
                "{} provider '{}' has no API key; set api_key or {}",
                section, name, env_name
            ))
        })?;

        Ok(ResolvedProvider {
            name: name.to_string(),
            api_key,
            config: config.clone(),
        })
    }
}

impl AppConfig {
    /// Validate the entire configuration
    pub fn validate(&self) -> Result<(), Vec<ValidationError>> {
        let mut errors = Vec::new();

        self.text.validate("text", &mut errors);
        self.image.validate("image", &mut errors);

        if self.generation.max_concurrency == 0 {
            errors.push(ValidationError::Generation(
                "max_concurrency must be at least 1".to_string(),
            ));
        }
        if self.generation.retained_tasks == 0 {
            errors.push(ValidationError::Generation(
                "retained_tasks must be at least 1".to_string(),
            ));
        }
        if self.generation.request_timeout_secs == 0 || self.generation.text_timeout_secs == 0 {
            errors.push(ValidationError::Generation(
                "timeouts must be at least 1 second".to_string(),
            ));
        }
        if self.storage.history_dir.as_os_str().is_empty() {
            errors.push(ValidationError::Storage(
                "history_dir cannot be empty".to_string(),
            ));
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    pub fn resolve_text_provider(&self) -> Result<ResolvedProvider, ApiError> {
        self.text.resolve("text")
    }

    pub fn resolve_image_provider(&self) -> Result<ResolvedProvider, ApiError> {
        self.image.resolve("image")
    }

    /// Options for text stages driven by `text`.
    pub fn stage_options(&self, text: &ResolvedProvider) -> StageOptions {
        let timeout = text
            .config
            .timeout_secs
            .unwrap_or(self.generation.text_timeout_secs);
        StageOptions {
            timeout: Duration::from_secs(timeout),
            temperature: text.config.temperature,
            max_output_tokens: text.config.max_output_tokens,
        }
    }

    /// Coordinator settings for the resolved image provider.
    pub fn coordinator_settings(&self, image: &ResolvedProvider) -> CoordinatorSettings {
        let timeout = image
            .config
            .timeout_secs
            .unwrap_or(self.generation.request_timeout_secs);
        let defaults = ImageOptions::default();
        CoordinatorSettings {
            mode: ConcurrencyMode::from_config(
                image.config.high_concurrency,
                self.generation.max_concurrency,
            ),
            image: ImageOptions {
                timeout: Duration::from_secs(timeout),
                size: image.config.size.clone(),
                aspect_ratio: image.config.aspect_ratio.clone().or(defaults.aspect_ratio),
                quality: image.config.quality.clone(),
            },
            prompt: PagePromptTemplate::for_provider(image.config.short_prompt),
            retained_tasks: self.generation.retained_tasks,
        }
    }
}

/// Loads [`AppConfig`] from its layered sources.
pub struct ConfigLoader;

impl ConfigLoader {
    /// Defaults, global file, workspace files.
    pub fn load(workspace_root: &Path) -> Result<AppConfig, ApiError> {
        let builder = merge::merge_policy::builder_with_defaults()?;
        let builder = sources::global_file::add_to_builder(builder)?;
        let builder = sources::workspace_file::add_to_builder(builder, workspace_root)?;
        let config: AppConfig = builder.build()?.try_deserialize()?;
        debug!(
            workspace = %workspace_root.display(),
            text_providers = config.text.providers.len(),
            image_providers = config.image.providers.len(),
            "Configuration loaded"
        );
        Ok(config)
    }

    /// Defaults plus exactly one file, which must exist.
    pub fn load_from_file(path: &Path) -> Result<AppConfig, ApiError> {
        if !path.exists() {
            return Err(ApiError::ConfigError(format!(
                "Config file not found: {}",
                path.display()
            )));
        }
        let config = merge::merge_policy::builder_with_defaults()?
            .add_source(config::File::from(path).required(true))
            .build()?
            .try_deserialize()?;
        Ok(config)
    }

    /// Defaults only.
    pub fn default_config() -> AppConfig {
        AppConfig::default()
    }
}
