//! The three text steps of the concept pipeline: analyze, map, design.

use super::knowledge::KnowledgeRegistry;
use crate::error::ApiError;
use crate::json_extract::extract_as;
use crate::prompt::{render, CONCEPT_ANALYZE_TEMPLATE, CONCEPT_DESIGN_TEMPLATE, CONCEPT_MAP_TEMPLATE};
use crate::provider::{ModelProviderClient, TextRequest};
use crate::stage::{call_text, StageOptions};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tracing::info;

/// Articles are cut to this many characters before analysis.
pub const MAX_ARTICLE_CHARS: usize = 15_000;
pub const DEFAULT_MAX_CONCEPTS: usize = 8;
pub const DESIGN_MAX_OUTPUT_TOKENS: u32 = 16_000;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct KeyConcept {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub name_cn: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub key_quote: String,
    #[serde(default)]
    pub visualization_type: String,
    /// Models return this as a number or a string; kept as given.
    #[serde(default)]
    pub importance: Value,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Relationship {
    pub from: String,
    pub to: String,
    #[serde(rename = "type", default)]
    pub kind: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConceptAnalysis {
    #[serde(default)]
    pub main_theme: String,
    #[serde(default)]
    pub key_concepts: Vec<KeyConcept>,
    #[serde(default)]
    pub relationships: Vec<Relationship>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameworkMapping {
    #[serde(default)]
    pub concept_id: String,
    #[serde(default)]
    pub original_name: String,
    #[serde(default)]
    pub framework: String,
    #[serde(default)]
    pub framework_name: String,
    #[serde(default)]
    pub mapping_explanation: String,
    #[serde(default)]
    pub new_title: String,
    #[serde(default)]
    pub subtitle: String,
    #[serde(default)]
    pub insight: String,
    #[serde(default)]
    pub visual_metaphor: String,
    #[serde(default)]
    pub recommended_chart: Option<String>,
    #[serde(default)]
    pub alternative_charts: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConceptDesign {
    #[serde(default)]
    pub concept_id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub chart_type: String,
    #[serde(default)]
    pub visual_elements: Vec<String>,
    #[serde(default, alias = "prompt")]
    pub image_prompt: Option<String>,
}

#[derive(Deserialize)]
struct MappingReply {
    #[serde(default)]
    mappings: Vec<FrameworkMapping>,
}

#[derive(Deserialize)]
struct DesignReply {
    #[serde(default)]
    designs: Vec<ConceptDesign>,
}

fn parse_error(stage: &str, message: impl Into<String>) -> ApiError {
    ApiError::StageParse {
        stage: stage.to_string(),
        message: message.into(),
    }
}

fn to_prompt_json<T: Serialize>(stage: &str, value: &T) -> Result<String, ApiError> {
    serde_json::to_string_pretty(value).map_err(|e| parse_error(stage, e.to_string()))
}

/// First `max_chars` characters of `text`.
pub fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((byte_index, _)) => &text[..byte_index],
        None => text,
    }
}

pub struct AnalyzeStage {
    client: Arc<dyn ModelProviderClient>,
    options: StageOptions,
}

impl AnalyzeStage {
    pub fn new(client: Arc<dyn ModelProviderClient>, options: StageOptions) -> Self {
        Self { client, options }
    }

    pub async fn run(&self, article: &str, max_concepts: usize) -> Result<ConceptAnalysis, ApiError> {
        let article = article.trim();
        if article.is_empty() {
            return Err(ApiError::InvalidInput("Article must not be empty".to_string()));
        }
        let max_concepts = if max_concepts == 0 {
            DEFAULT_MAX_CONCEPTS
        } else {
            max_concepts
        };

        let prompt = render(
            CONCEPT_ANALYZE_TEMPLATE,
            &[
                ("article", truncate_chars(article, MAX_ARTICLE_CHARS)),
                ("max_concepts", &max_concepts.to_string()),
            ],
        );
        let reply = call_text("analyze", self.client.as_ref(), &self.options, TextRequest::new(prompt)).await?;

        let mut analysis: ConceptAnalysis =
            extract_as(&reply).map_err(|message| parse_error("analyze", message))?;
        if analysis.key_concepts.is_empty() {
            return Err(parse_error("analyze", "reply has no key_concepts"));
        }
        analysis.key_concepts.truncate(max_concepts);
        info!(
            concepts = analysis.key_concepts.len(),
            theme = %analysis.main_theme,
            "Article analyzed"
        );
        Ok(analysis)
    }
}

pub struct MapStage {
    client: Arc<dyn ModelProviderClient>,
    options: StageOptions,
    knowledge: Arc<KnowledgeRegistry>,
}

impl MapStage {
    pub fn new(
        client: Arc<dyn ModelProviderClient>,
        options: StageOptions,
        knowledge: Arc<KnowledgeRegistry>,
    ) -> Self {
        Self {
            client,
            options,
            knowledge,
        }
    }

    pub async fn run(&self, concepts: &[KeyConcept]) -> Result<Vec<FrameworkMapping>, ApiError> {
        if concepts.is_empty() {
            return Err(ApiError::InvalidInput("No concepts to map".to_string()));
        }
        let concepts_json = to_prompt_json("map", &concepts)?;
        let frameworks = self.knowledge.frameworks_for_prompt();
        let prompt = render(
            CONCEPT_MAP_TEMPLATE,
            &[("frameworks", &frameworks), ("concepts", &concepts_json)],
        );
        let reply = call_text("map", self.client.as_ref(), &self.options, TextRequest::new(prompt)).await?;

        let MappingReply { mut mappings } =
            extract_as(&reply).map_err(|message| parse_error("map", message))?;
        if mappings.is_empty() {
            return Err(parse_error("map", "reply has no mappings"));
        }
        for mapping in &mut mappings {
            fill_chart_defaults(&self.knowledge, mapping);
        }
        info!(mappings = mappings.len(), "Concepts mapped to frameworks");
        Ok(mappings)
    }
}

/// Fill missing chart suggestions from the mapped framework's catalogue entry.
pub fn fill_chart_defaults(knowledge: &KnowledgeRegistry, mapping: &mut FrameworkMapping) {
    let Some(framework) = knowledge.framework(&mapping.framework) else {
        return;
    };
    let missing_recommended = mapping
        .recommended_chart
        .as_deref()
        .map_or(true, |c| c.trim().is_empty());
    if missing_recommended {
        if let Some(chart) = &framework.canonical_chart {
            mapping.recommended_chart = Some(chart.clone());
        }
    }
    if mapping.alternative_charts.is_empty() {
        mapping.alternative_charts = framework.suggested_charts.clone();
    }
}

pub struct DesignStage {
    client: Arc<dyn ModelProviderClient>,
    options: StageOptions,
    knowledge: Arc<KnowledgeRegistry>,
}

impl DesignStage {
    pub fn new(
        client: Arc<dyn ModelProviderClient>,
        options: StageOptions,
        knowledge: Arc<KnowledgeRegistry>,
    ) -> Self {
        let options = StageOptions {
            max_output_tokens: options.max_output_tokens.or(Some(DESIGN_MAX_OUTPUT_TOKENS)),
            ..options
        };
        Self {
            client,
            options,
            knowledge,
        }
    }

    pub async fn run(
        &self,
        mappings: &[FrameworkMapping],
        style_prefix: &str,
    ) -> Result<Vec<ConceptDesign>, ApiError> {
        if mappings.is_empty() {
            return Err(ApiError::InvalidInput("No mappings to design".to_string()));
        }
        let mappings_json = to_prompt_json("design", &mappings)?;
        let chart_types = self.knowledge.chart_types_for_prompt();
        let prompt = render(
            CONCEPT_DESIGN_TEMPLATE,
            &[
                ("style_prefix", style_prefix),
                ("chart_types", &chart_types),
                ("mappings", &mappings_json),
            ],
        );
        let reply = call_text("design", self.client.as_ref(), &self.options, TextRequest::new(prompt)).await?;

        let DesignReply { designs } =
            extract_as(&reply).map_err(|message| parse_error("design", message))?;
        if designs.is_empty() {
            return Err(parse_error("design", "reply has no designs"));
        }
        info!(designs = designs.len(), "Concept visuals designed");
        Ok(designs)
    }
}
