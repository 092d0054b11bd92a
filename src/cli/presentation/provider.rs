//! Provider command presentation: resolved text/image providers.

use super::history::to_pretty_json;
use crate::error::ApiError;
use crate::provider::ResolvedProvider;
use comfy_table::Table;
use serde::Serialize;

/// One section's active provider as the CLI shows it. Keys are always masked.
#[derive(Debug, Clone, Serialize)]
pub struct ProviderSummary {
    pub section: String,
    pub name: Option<String>,
    pub provider_type: Option<String>,
    pub model: Option<String>,
    pub base_url: Option<String>,
    pub api_key: Option<String>,
    pub high_concurrency: bool,
    pub short_prompt: bool,
    pub error: Option<String>,
}

impl ProviderSummary {
    pub fn from_resolution(section: &str, resolved: Result<ResolvedProvider, ApiError>) -> Self {
        match resolved {
            Ok(provider) => Self {
                section: section.to_string(),
                api_key: Some(provider.masked_api_key()),
                provider_type: Some(provider.config.provider_type.as_str().to_string()),
                model: Some(provider.config.model.clone()),
                base_url: provider.config.base_url.clone(),
                high_concurrency: provider.config.high_concurrency,
                short_prompt: provider.config.short_prompt,
                name: Some(provider.name),
                error: None,
            },
            Err(e) => Self {
                section: section.to_string(),
                name: None,
                provider_type: None,
                model: None,
                base_url: None,
                api_key: None,
                high_concurrency: false,
                short_prompt: false,
                error: Some(e.to_string()),
            },
        }
    }
}

pub fn format_providers_text(providers: &[ProviderSummary]) -> String {
    let dash = || "-".to_string();
    let mut table = Table::new();
    table.load_preset(comfy_table::presets::UTF8_FULL);
    table.set_header(vec![
        "Section", "Provider", "Type", "Model", "Endpoint", "API Key", "Flags",
    ]);
    let mut problems = Vec::new();
    for p in providers {
        if let Some(error) = &p.error {
            problems.push(format!("  [{}] {}", p.section, error));
        }
        let mut flags = Vec::new();
        if p.high_concurrency {
            flags.push("high_concurrency");
        }
        if p.short_prompt {
            flags.push("short_prompt");
        }
        table.add_row(vec![
            p.section.clone(),
            p.name.clone().unwrap_or_else(dash),
            p.provider_type.clone().unwrap_or_else(dash),
            p.model.clone().unwrap_or_else(dash),
            p.base_url
                .clone()
                .unwrap_or_else(|| "(default endpoint)".to_string()),
            p.api_key.clone().unwrap_or_else(dash),
            if flags.is_empty() { dash() } else { flags.join(",") },
        ]);
    }
    let mut output = table.to_string();
    if !problems.is_empty() {
        output.push_str("\n\nUnresolved:\n");
        output.push_str(&problems.join("\n"));
    }
    output
}

pub fn format_providers_json(providers: &[ProviderSummary]) -> Result<String, ApiError> {
    to_pretty_json(providers)
}
