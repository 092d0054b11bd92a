//! ContentStage: publish copy (titles, body text, tags) for an outlined note.

use crate::error::ApiError;
use crate::json_extract::extract_json_object;
use crate::prompt::{render, CONTENT_TEMPLATE};
use crate::provider::{ModelProviderClient, TextRequest};
use crate::stage::{call_text, StageOptions};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tracing::info;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NoteContent {
    pub titles: Vec<String>,
    pub copywriting: String,
    pub tags: Vec<String>,
}

pub struct ContentStage {
    client: Arc<dyn ModelProviderClient>,
    options: StageOptions,
}

impl ContentStage {
    pub fn new(client: Arc<dyn ModelProviderClient>, options: StageOptions) -> Self {
        Self { client, options }
    }

    pub async fn generate(&self, topic: &str, outline: &str) -> Result<NoteContent, ApiError> {
        let topic = topic.trim();
        if topic.is_empty() {
            return Err(ApiError::InvalidInput("Topic must not be empty".to_string()));
        }
        if outline.trim().is_empty() {
            return Err(ApiError::InvalidInput("Outline must not be empty".to_string()));
        }

        let prompt = render(CONTENT_TEMPLATE, &[("topic", topic), ("outline", outline)]);
        let reply = call_text(
            "content",
            self.client.as_ref(),
            &self.options,
            TextRequest::new(prompt),
        )
        .await?;

        let content = parse_content(&reply)?;
        info!(
            titles = content.titles.len(),
            tags = content.tags.len(),
            "Note content generated"
        );
        Ok(content)
    }
}

/// Parse the content reply, tolerating string-typed `titles` and `tags`.
pub fn parse_content(reply: &str) -> Result<NoteContent, ApiError> {
    let value = extract_json_object(reply).ok_or_else(|| ApiError::StageParse {
        stage: "content".to_string(),
        message: "no JSON object in reply".to_string(),
    })?;

    let content = NoteContent {
        titles: string_list(&value["titles"], false),
        copywriting: value["copywriting"].as_str().unwrap_or_default().trim().to_string(),
        tags: string_list(&value["tags"], true),
    };

    if content.titles.is_empty() && content.copywriting.is_empty() {
        return Err(ApiError::StageParse {
            stage: "content".to_string(),
            message: "reply has neither titles nor copywriting".to_string(),
        });
    }
    Ok(content)
}

/// Array of strings, or a single string (comma-split when `split` is set).
fn string_list(value: &Value, split: bool) -> Vec<String> {
    match value {
        Value::Array(items) => items
            .iter()
            .filter_map(Value::as_str)
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect(),
        Value::String(s) if split => s
            .split([',', '，'])
            .map(|t| t.trim().trim_start_matches('#').to_string())
            .filter(|t| !t.is_empty())
            .collect(),
        Value::String(s) if !s.trim().is_empty() => vec![s.trim().to_string()],
        _ => Vec::new(),
    }
}
