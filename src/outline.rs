//! OutlineStage: topic (+ reference images) to an ordered page list.

use crate::error::ApiError;
use crate::generation::{Page, PageType};
use crate::prompt::{render, OUTLINE_IMAGES_NOTE, OUTLINE_TEMPLATE};
use crate::provider::{ImageData, ModelProviderClient, TextRequest};
use crate::stage::{call_text, StageOptions};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

pub const MAX_REFERENCE_IMAGES: usize = 5;

/// Raw reply plus the parsed pages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutlineResult {
    pub raw: String,
    pub pages: Vec<Page>,
    #[serde(default)]
    pub has_images: bool,
}

pub struct OutlineStage {
    client: Arc<dyn ModelProviderClient>,
    options: StageOptions,
}

impl OutlineStage {
    pub fn new(client: Arc<dyn ModelProviderClient>, options: StageOptions) -> Self {
        Self { client, options }
    }

    pub async fn generate(
        &self,
        topic: &str,
        images: Vec<ImageData>,
    ) -> Result<OutlineResult, ApiError> {
        let topic = topic.trim();
        if topic.is_empty() {
            return Err(ApiError::InvalidInput("Topic must not be empty".to_string()));
        }
        if images.len() > MAX_REFERENCE_IMAGES {
            return Err(ApiError::InvalidInput(format!(
                "At most {} reference images are allowed, got {}",
                MAX_REFERENCE_IMAGES,
                images.len()
            )));
        }

        let has_images = !images.is_empty();
        let mut prompt = render(OUTLINE_TEMPLATE, &[("topic", topic)]);
        if has_images {
            prompt.push_str(OUTLINE_IMAGES_NOTE);
        }

        let raw = call_text(
            "outline",
            self.client.as_ref(),
            &self.options,
            TextRequest::new(prompt).with_images(images),
        )
        .await?;

        let pages = parse_outline(&raw)?;
        info!(topic, pages = pages.len(), "Outline generated");
        Ok(OutlineResult {
            raw,
            pages,
            has_images,
        })
    }
}

/// Split an outline reply into pages.
///
/// Sections are delimited by `<page>` (any case) when present, otherwise by `---`.
/// Blank sections are dropped and the remaining pages are numbered from 0.
pub fn parse_outline(text: &str) -> Result<Vec<Page>, ApiError> {
    let chunks = if text.to_ascii_lowercase().contains("<page>") {
        split_ascii_case_insensitive(text, "<page>")
    } else {
        text.split("---").collect()
    };

    let pages: Vec<Page> = chunks
        .into_iter()
        .map(str::trim)
        .filter(|chunk| !chunk.is_empty())
        .enumerate()
        .map(|(index, chunk)| Page::new(index, detect_page_type(chunk), chunk))
        .collect();

    if pages.is_empty() {
        return Err(ApiError::OutlineParse(
            "Reply contains no page sections".to_string(),
        ));
    }
    Ok(pages)
}

fn split_ascii_case_insensitive<'a>(text: &'a str, delimiter: &str) -> Vec<&'a str> {
    // ASCII lowercasing keeps byte offsets aligned with `text`.
    let haystack = text.to_ascii_lowercase();
    let needle = delimiter.to_ascii_lowercase();
    let mut chunks = Vec::new();
    let mut start = 0;
    for (pos, _) in haystack.match_indices(&needle) {
        chunks.push(&text[start..pos]);
        start = pos + needle.len();
    }
    chunks.push(&text[start..]);
    chunks
}

/// Page type from a leading `[tag]`; anything unrecognised is content.
fn detect_page_type(chunk: &str) -> PageType {
    let Some(rest) = chunk.strip_prefix('[') else {
        return PageType::Content;
    };
    let Some(end) = rest.find(']') else {
        return PageType::Content;
    };
    match rest[..end].trim().to_lowercase().as_str() {
        "封面" | "cover" => PageType::Cover,
        "总结" | "summary" => PageType::Summary,
        _ => PageType::Content,
    }
}
