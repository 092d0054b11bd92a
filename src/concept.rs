//! Concept visualization pipeline
//!
//! An article goes through four sequential steps: analyze (key concepts), map (theory
//! frameworks), design (one image prompt per concept) and generate. The first three are
//! single text calls chained on the previous step's output; generate hands the designs
//! to the [`GenerationCoordinator`] as pages, so images fan out under the same cap and
//! event protocol as note pages.

pub mod history;
pub mod knowledge;
pub mod stages;

pub use history::{
    ConceptHistoryReporter, ConceptHistoryStore, ConceptIndexEntry, ConceptRecord,
    ConceptRecordPage, ConceptRecordStatus, ConceptRecordUpdate, CONCEPT_HISTORY_DIR,
};

pub use knowledge::{ChartType, Framework, KnowledgeRegistry, VisualStyle, DEFAULT_STYLE};
pub use stages::{
    AnalyzeStage, ConceptAnalysis, ConceptDesign, DesignStage, FrameworkMapping, KeyConcept,
    MapStage, Relationship, DEFAULT_MAX_CONCEPTS, MAX_ARTICLE_CHARS,
};

use crate::error::ApiError;
use crate::generation::{
    EventSink, GenerationCoordinator, GenerationRequest, GenerationSummary, Page, PageResult,
    PageType, DEFAULT_EVENT_BUFFER,
};
use crate::pipeline::{check_step, skip_step, PipelineEvent, PipelineStep};
use crate::prompt::PagePromptTemplate;
use crate::provider::ModelProviderClient;
use crate::stage::StageOptions;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc::Receiver;
use tokio::task::JoinHandle;
use tracing::{info, warn};

pub const TOTAL_STEPS: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConceptStep {
    Analyze,
    Map,
    Design,
    Generate,
}

impl PipelineStep for ConceptStep {
    fn number(&self) -> usize {
        match self {
            ConceptStep::Analyze => 1,
            ConceptStep::Map => 2,
            ConceptStep::Design => 3,
            ConceptStep::Generate => 4,
        }
    }

    fn name(&self) -> &'static str {
        match self {
            ConceptStep::Analyze => "analyze",
            ConceptStep::Map => "map",
            ConceptStep::Design => "design",
            ConceptStep::Generate => "generate",
        }
    }
}

/// Pipeline input.
#[derive(Debug, Clone)]
pub struct ConceptRequest {
    pub article: String,
    pub style: String,
    pub max_concepts: usize,
    pub task_id: Option<String>,
    /// Stop after design
    pub skip_generate: bool,
}

impl ConceptRequest {
    pub fn new(article: impl Into<String>) -> Self {
        Self {
            article: article.into(),
            style: DEFAULT_STYLE.to_string(),
            max_concepts: DEFAULT_MAX_CONCEPTS,
            task_id: None,
            skip_generate: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConceptReport {
    pub task_id: String,
    /// Concept history record for this run, when history is attached.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub record_id: Option<String>,
    pub style: String,
    pub main_theme: String,
    pub concepts: Vec<KeyConcept>,
    pub relationships: Vec<Relationship>,
    pub mappings: Vec<FrameworkMapping>,
    pub designs: Vec<ConceptDesign>,
    pub images: Vec<PageResult>,
    pub summary: Option<GenerationSummary>,
    pub elapsed_ms: u64,
}

pub type ConceptEvent = PipelineEvent<ConceptStep, ConceptReport>;

/// `{nn}_{title}.png` with a 1-based position; characters other than letters, digits and `._-` become `_`.
pub fn concept_file_name(position: usize, title: &str) -> String {
    let title = title.trim();
    let safe_title: String = if title.is_empty() {
        format!("concept_{:02}", position)
    } else {
        title
            .chars()
            .map(|c| {
                if c.is_alphanumeric() || matches!(c, '.' | '_' | '-') {
                    c
                } else {
                    '_'
                }
            })
            .collect()
    };
    format!("{:02}_{}.png", position, safe_title)
}

pub struct ConceptPipeline {
    analyze: AnalyzeStage,
    map: MapStage,
    design: DesignStage,
    coordinator: Arc<GenerationCoordinator>,
    knowledge: Arc<KnowledgeRegistry>,
    history: Option<Arc<dyn ConceptHistoryReporter>>,
}

impl ConceptPipeline {
    pub fn new(
        text_client: Arc<dyn ModelProviderClient>,
        coordinator: Arc<GenerationCoordinator>,
        knowledge: Arc<KnowledgeRegistry>,
        options: StageOptions,
    ) -> Self {
        Self {
            analyze: AnalyzeStage::new(Arc::clone(&text_client), options.clone()),
            map: MapStage::new(Arc::clone(&text_client), options.clone(), Arc::clone(&knowledge)),
            design: DesignStage::new(text_client, options, Arc::clone(&knowledge)),
            coordinator,
            knowledge,
            history: None,
        }
    }

    pub fn with_history(mut self, history: Arc<dyn ConceptHistoryReporter>) -> Self {
        self.history = Some(history);
        self
    }

    pub fn knowledge(&self) -> &KnowledgeRegistry {
        &self.knowledge
    }

    pub async fn run(
        &self,
        request: ConceptRequest,
        sink: &EventSink<ConceptEvent>,
    ) -> Result<ConceptReport, ApiError> {
        let started = Instant::now();
        let task_id = request.task_id.clone().unwrap_or_else(new_concept_task_id);
        let style = self
            .knowledge
            .visual_style(&request.style)
            .cloned()
            .ok_or_else(|| ApiError::NotFound(format!("Visual style '{}' not found", request.style)))?;

        info!(task_id = %task_id, style = %style.id, "Starting concept pipeline");
        sink.emit(PipelineEvent::Start {
            task_id: task_id.clone(),
            total_steps: TOTAL_STEPS,
            meta: json!({ "style": style.id }),
        })
        .await;
        let record_id = self.record_start(&request, &task_id, &style.id);

        match self
            .run_steps(request, task_id, style, record_id.as_deref(), sink)
            .await
        {
            Ok(mut report) => {
                report.record_id = record_id;
                report.elapsed_ms = started.elapsed().as_millis() as u64;
                self.record_update(
                    report.record_id.as_deref(),
                    ConceptRecordUpdate::finished(&report),
                );
                info!(task_id = %report.task_id, elapsed_ms = report.elapsed_ms, "Concept pipeline finished");
                sink.emit(PipelineEvent::Complete(Box::new(report.clone())))
                    .await;
                Ok(report)
            }
            Err(err) => {
                self.record_update(record_id.as_deref(), ConceptRecordUpdate::failed(&err));
                Err(err)
            }
        }
    }

    async fn run_steps(
        &self,
        request: ConceptRequest,
        task_id: String,
        style: VisualStyle,
        record_id: Option<&str>,
        sink: &EventSink<ConceptEvent>,
    ) -> Result<ConceptReport, ApiError> {
        sink.emit(PipelineEvent::StepStart(ConceptStep::Analyze)).await;
        let analysis = self
            .analyze
            .run(&request.article, request.max_concepts)
            .await;
        let analysis = check_step(sink, ConceptStep::Analyze, analysis).await?;
        if !analysis.main_theme.trim().is_empty() {
            self.record_update(
                record_id,
                ConceptRecordUpdate {
                    title: Some(analysis.main_theme.trim().to_string()),
                    ..Default::default()
                },
            );
        }
        sink.emit(PipelineEvent::StepComplete {
            step: ConceptStep::Analyze,
            summary: json!({
                "main_theme": analysis.main_theme,
                "concept_count": analysis.key_concepts.len(),
            }),
        })
        .await;

        sink.emit(PipelineEvent::StepStart(ConceptStep::Map)).await;
        let mappings = self.map.run(&analysis.key_concepts).await;
        let mappings = check_step(sink, ConceptStep::Map, mappings).await?;
        sink.emit(PipelineEvent::StepComplete {
            step: ConceptStep::Map,
            summary: json!({ "mapping_count": mappings.len() }),
        })
        .await;

        sink.emit(PipelineEvent::StepStart(ConceptStep::Design)).await;
        let designs = self.design.run(&mappings, &style.style_prefix).await;
        let designs = check_step(sink, ConceptStep::Design, designs).await?;
        sink.emit(PipelineEvent::StepComplete {
            step: ConceptStep::Design,
            summary: json!({ "design_count": designs.len() }),
        })
        .await;

        let mut images = Vec::new();
        let mut summary = None;
        if request.skip_generate {
            skip_step(sink, ConceptStep::Generate, "image generation disabled").await;
        } else {
            sink.emit(PipelineEvent::StepStart(ConceptStep::Generate)).await;
            let generation = self
                .coordinator
                .run_generation(design_request(&task_id, &designs, &style.style_prefix), sink)
                .await;
            let report = check_step(sink, ConceptStep::Generate, generation).await?;
            sink.emit(PipelineEvent::StepComplete {
                step: ConceptStep::Generate,
                summary: json!({
                    "total": report.summary.total,
                    "success_count": report.summary.completed,
                }),
            })
            .await;
            summary = Some(report.summary);
            images = report.results;
        }

        Ok(ConceptReport {
            task_id,
            record_id: None,
            style: style.id,
            main_theme: analysis.main_theme,
            concepts: analysis.key_concepts,
            relationships: analysis.relationships,
            mappings,
            designs,
            images,
            summary,
            elapsed_ms: 0,
        })
    }

    fn record_start(&self, request: &ConceptRequest, task_id: &str, style: &str) -> Option<String> {
        let history = self.history.as_ref()?;
        let title = history::fallback_title(&request.article);
        match history.create(&title, &request.article, task_id, style) {
            Ok(record_id) => Some(record_id),
            Err(err) => {
                warn!(task_id, error = %err, "Failed to create concept history record");
                None
            }
        }
    }

    /// Best-effort history write; failures are logged, never propagated.
    fn record_update(&self, record_id: Option<&str>, update: ConceptRecordUpdate) {
        let (Some(history), Some(record_id)) = (&self.history, record_id) else {
            return;
        };
        match history.update(record_id, update) {
            Ok(true) => {}
            Ok(false) => warn!(record_id, "Concept record not found; skipping update"),
            Err(err) => warn!(record_id, error = %err, "Failed to update concept record"),
        }
    }

    pub fn spawn(
        self: &Arc<Self>,
        request: ConceptRequest,
    ) -> (
        Receiver<ConceptEvent>,
        JoinHandle<Result<ConceptReport, ApiError>>,
    ) {
        let (sink, receiver) = EventSink::new_pair(DEFAULT_EVENT_BUFFER);
        let pipeline = Arc::clone(self);
        let handle = tokio::spawn(async move { pipeline.run(request, &sink).await });
        (receiver, handle)
    }
}

fn new_concept_task_id() -> String {
    let id = uuid::Uuid::new_v4().simple().to_string();
    format!("concept_{}", &id[..8])
}

/// Designs become content pages; a design without a prompt becomes an empty page that fails alone.
fn design_request(task_id: &str, designs: &[ConceptDesign], style_prefix: &str) -> GenerationRequest {
    let mut file_names = HashMap::new();
    let pages = designs
        .iter()
        .enumerate()
        .map(|(index, design)| {
            file_names.insert(index, concept_file_name(index + 1, &design.title));
            let prompt = design.image_prompt.clone().unwrap_or_default();
            Page::new(index, PageType::Content, prompt)
        })
        .collect();
    GenerationRequest::new(task_id, pages)
        .with_reference(false)
        .with_prompt(PagePromptTemplate::concept(style_prefix))
        .with_file_names(file_names)
}
