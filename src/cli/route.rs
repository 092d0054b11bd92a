//! CLI route: single route table and run context. Dispatches to domain services and presentation.

use crate::cli::output::drain_events;
use crate::cli::parse::{Commands, ConceptCommands, ConceptHistoryCommands, HistoryCommands};
use crate::cli::presentation::{
    format_concept_page_json, format_concept_page_text, format_concept_record_json,
    format_concept_record_text,
    format_history_page_json, format_history_page_text, format_knowledge_text,
    format_providers_json, format_providers_text, format_record_json, format_record_text,
    format_search_result_text, format_statistics_text, to_pretty_json, ProviderSummary,
};
use crate::cli::{command_name, is_streaming};
use crate::concept::{
    ConceptHistoryReporter, ConceptHistoryStore, ConceptPipeline, ConceptRecordStatus,
    ConceptRequest, KnowledgeRegistry, CONCEPT_HISTORY_DIR,
};
use crate::config::{AppConfig, ConfigLoader, StorageConfig};
use crate::content::ContentStage;
use crate::error::{ApiError, StorageError};
use crate::generation::{
    EventSink, GenerationCoordinator, GenerationRequest, Page, ProgressEvent,
    DEFAULT_EVENT_BUFFER,
};
use crate::history::{HistoryReporter, LocalHistoryStore, RecordStatus};
use crate::outline::{parse_outline, OutlineResult, OutlineStage};
use crate::pipeline::{NotePipeline, NoteRequest};
use crate::provider::{ImageData, ModelProviderClient, ProviderFactory};
use crate::stage::StageOptions;
use crate::storage::{ImageStore, LocalImageStore};
use serde_json::json;
use std::collections::BTreeSet;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Runtime context for CLI execution: workspace, loaded config and resolved storage paths.
/// Built from workspace path and optional config path using ConfigLoader only.
pub struct RunContext {
    config: AppConfig,
    workspace_root: PathBuf,
    storage: StorageConfig,
}

impl RunContext {
    /// Create run context from workspace root and optional config path. Uses ConfigLoader only.
    pub fn new(workspace_root: PathBuf, config_path: Option<PathBuf>) -> Result<Self, ApiError> {
        let config = if let Some(ref cfg_path) = config_path {
            ConfigLoader::load_from_file(cfg_path)?
        } else {
            ConfigLoader::load(&workspace_root)?
        };
        Self::from_config(workspace_root, config)
    }

    /// Context over an already loaded config.
    pub fn from_config(workspace_root: PathBuf, config: AppConfig) -> Result<Self, ApiError> {
        if let Err(errors) = config.validate() {
            let messages: Vec<String> = errors.iter().map(|e| e.to_string()).collect();
            return Err(ApiError::ConfigError(messages.join("; ")));
        }
        let storage = config.storage.resolve(&workspace_root);
        debug!(
            workspace = %workspace_root.display(),
            history_dir = %storage.history_dir.display(),
            "Run context ready"
        );
        Ok(Self {
            config,
            workspace_root,
            storage,
        })
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn workspace_root(&self) -> &Path {
        &self.workspace_root
    }

    /// Execute a command, writing streamed events to stdout.
    pub fn execute(&self, command: &Commands) -> Result<String, ApiError> {
        let stdout = std::io::stdout();
        let mut out = stdout.lock();
        self.execute_with_output(command, &mut out)
    }

    /// Execute a command via the single route table.
    ///
    /// Streaming commands write their events to `out` as they arrive and return an
    /// empty string; the others return their rendered output.
    pub fn execute_with_output(
        &self,
        command: &Commands,
        out: &mut dyn Write,
    ) -> Result<String, ApiError> {
        let started = Instant::now();
        let name = command_name(command);
        info!(command = %name, "Executing command");
        let result = self.route(command, out);
        match &result {
            Ok(_) => info!(
                command = %name,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "Command finished"
            ),
            Err(e) => warn!(command = %name, error = %e, "Command failed"),
        }
        if is_streaming(command) {
            result.map(|_| String::new())
        } else {
            result
        }
    }

    fn route(&self, command: &Commands, out: &mut dyn Write) -> Result<String, ApiError> {
        match command {
            Commands::Outline {
                topic,
                images,
                format,
            } => self.handle_outline(topic, images, format),
            Commands::Content {
                topic,
                outline,
                format,
            } => self.handle_content(topic, outline, format),
            Commands::Generate {
                outline,
                task_id,
                topic,
                images,
                no_reference,
                record_id,
                format,
            } => {
                let outline = load_outline(outline)?;
                let task_id = task_id.clone().unwrap_or_else(crate::generation::new_task_id);
                let mut request = GenerationRequest::new(task_id, outline.pages)
                    .with_outline(outline.raw)
                    .with_user_images(load_images(images)?)
                    .with_reference(self.config.generation.use_reference && !*no_reference);
                if let Some(topic) = topic {
                    request = request.with_topic(topic.clone());
                }
                if let Some(record_id) = record_id {
                    request = request.with_record_id(record_id.clone());
                }
                self.handle_generate(request, format, out)
            }
            Commands::Retry {
                task_id,
                outline,
                indices,
                topic,
                record_id,
                format,
            } => {
                let outline = load_outline(outline)?;
                let mut request = GenerationRequest::new(task_id.clone(), outline.pages)
                    .with_outline(outline.raw)
                    .with_reference(self.config.generation.use_reference);
                if let Some(topic) = topic {
                    request = request.with_topic(topic.clone());
                }
                if let Some(record_id) = record_id {
                    request = request.with_record_id(record_id.clone());
                }
                self.handle_retry(request, indices, format, out)
            }
            Commands::Run {
                topic,
                images,
                task_id,
                no_reference,
                skip_content,
                skip_images,
                no_history,
                format,
            } => {
                let mut request = NoteRequest::new(topic.clone());
                request.images = load_images(images)?;
                request.task_id = task_id.clone();
                request.use_reference = self.config.generation.use_reference && !*no_reference;
                request.skip_content = *skip_content;
                request.skip_images = *skip_images;
                self.handle_run(request, *no_history, format, out)
            }
            Commands::Concept {
                command: Some(ConceptCommands::History { command }),
                ..
            } => self.handle_concept_history_command(command),
            Commands::Concept {
                command: None,
                article,
                style,
                max_concepts,
                task_id,
                skip_generate,
                format,
            } => {
                let article = article
                    .as_deref()
                    .ok_or_else(|| ApiError::InvalidInput("--article is required".to_string()))?;
                let text = std::fs::read_to_string(article).map_err(|e| {
                    ApiError::InvalidInput(format!(
                        "Cannot read article {}: {}",
                        article.display(),
                        e
                    ))
                })?;
                let mut request = ConceptRequest::new(text);
                request.style = style.clone();
                request.max_concepts = *max_concepts;
                request.task_id = task_id.clone();
                request.skip_generate = *skip_generate;
                self.handle_concept(request, format, out)
            }
            Commands::History { command } => self.handle_history_command(command),
            Commands::Providers { format } => self.handle_providers(format),
            Commands::Knowledge { format } => self.handle_knowledge(format),
        }
    }

    fn handle_outline(
        &self,
        topic: &str,
        images: &[PathBuf],
        format: &str,
    ) -> Result<String, ApiError> {
        let (client, options) = self.text_client()?;
        let stage = OutlineStage::new(client, options);
        let images = load_images(images)?;
        let outline = block_on(stage.generate(topic, images))??;
        if format == "json" {
            to_pretty_json(&outline)
        } else {
            Ok(outline.raw)
        }
    }

    fn handle_content(
        &self,
        topic: &str,
        outline: &Path,
        format: &str,
    ) -> Result<String, ApiError> {
        let outline = load_outline(outline)?;
        let (client, options) = self.text_client()?;
        let stage = ContentStage::new(client, options);
        let content = block_on(stage.generate(topic, &outline.raw))??;
        if format == "json" {
            to_pretty_json(&content)
        } else {
            Ok(format!(
                "Titles:\n{}\n\n{}\n\nTags: {}",
                content
                    .titles
                    .iter()
                    .map(|t| format!("  - {}", t))
                    .collect::<Vec<_>>()
                    .join("\n"),
                content.copywriting,
                content.tags.join(" ")
            ))
        }
    }

    fn handle_generate(
        &self,
        request: GenerationRequest,
        format: &str,
        out: &mut dyn Write,
    ) -> Result<String, ApiError> {
        let coordinator = self.coordinator()?;
        block_on(async {
            let (sink, receiver) = EventSink::<ProgressEvent>::new_pair(DEFAULT_EVENT_BUFFER);
            let run = async move { coordinator.run_generation(request, &sink).await };
            let (report, written) = tokio::join!(run, drain_events(receiver, format, out));
            written?;
            report.map(|_| String::new())
        })?
    }

    /// Restore what an earlier run left on disk, then retry the requested pages.
    ///
    /// Without explicit indices every page that has no stored image is retried.
    fn handle_retry(
        &self,
        request: GenerationRequest,
        indices: &[usize],
        format: &str,
        out: &mut dyn Write,
    ) -> Result<String, ApiError> {
        let coordinator = self.coordinator()?;
        let missing = coordinator.restore_task(&request)?;
        let wanted: BTreeSet<usize> = if indices.is_empty() {
            missing.into_iter().collect()
        } else {
            indices.iter().copied().collect()
        };
        let known: BTreeSet<usize> = request.pages.iter().map(|p| p.index).collect();
        if let Some(unknown) = wanted.iter().find(|i| !known.contains(i)) {
            return Err(ApiError::InvalidInput(format!(
                "Page {} is not part of the outline",
                unknown
            )));
        }
        let pages: Vec<Page> = request
            .pages
            .iter()
            .filter(|p| wanted.contains(&p.index))
            .cloned()
            .collect();
        info!(task_id = %request.task_id, pages = pages.len(), "Retrying pages");

        let task_id = request.task_id.clone();
        block_on(async {
            let (sink, receiver) = EventSink::<ProgressEvent>::new_pair(DEFAULT_EVENT_BUFFER);
            let run = async move { coordinator.retry_failed(&task_id, pages, &sink).await };
            let (report, written) = tokio::join!(run, drain_events(receiver, format, out));
            written?;
            report.map(|_| String::new())
        })?
    }

    fn handle_run(
        &self,
        request: NoteRequest,
        no_history: bool,
        format: &str,
        out: &mut dyn Write,
    ) -> Result<String, ApiError> {
        let (client, options) = self.text_client()?;
        let mut pipeline = NotePipeline::new(client, self.coordinator()?, options);
        if !no_history {
            pipeline = pipeline.with_history(self.history_reporter()?);
        }
        block_on(async {
            let (sink, receiver) = EventSink::new_pair(DEFAULT_EVENT_BUFFER);
            let run = async move { pipeline.run(request, &sink).await };
            let (report, written) = tokio::join!(run, drain_events(receiver, format, out));
            written?;
            report.map(|_| String::new())
        })?
    }

    fn handle_concept(
        &self,
        request: ConceptRequest,
        format: &str,
        out: &mut dyn Write,
    ) -> Result<String, ApiError> {
        let (client, options) = self.text_client()?;
        let history: Arc<dyn ConceptHistoryReporter> = Arc::new(self.concept_history_store()?);
        let pipeline = ConceptPipeline::new(
            client,
            self.coordinator()?,
            Arc::new(self.knowledge()?),
            options,
        )
        .with_history(history);
        block_on(async {
            let (sink, receiver) = EventSink::new_pair(DEFAULT_EVENT_BUFFER);
            let run = async move { pipeline.run(request, &sink).await };
            let (report, written) = tokio::join!(run, drain_events(receiver, format, out));
            written?;
            report.map(|_| String::new())
        })?
    }

    fn handle_history_command(&self, command: &HistoryCommands) -> Result<String, ApiError> {
        let store = self.history_store()?;
        match command {
            HistoryCommands::List {
                page,
                page_size,
                status,
                format,
            } => {
                let status = status
                    .as_deref()
                    .map(str::parse::<RecordStatus>)
                    .transpose()
                    .map_err(ApiError::InvalidInput)?;
                let page = store.list_records(*page, *page_size, status)?;
                if format == "json" {
                    format_history_page_json(&page)
                } else {
                    Ok(format_history_page_text(&page))
                }
            }
            HistoryCommands::Show { record_id, format } => {
                let record = store
                    .get_record(record_id)?
                    .ok_or_else(|| ApiError::NotFound(format!("History record {}", record_id)))?;
                if format == "json" {
                    format_record_json(&record)
                } else {
                    Ok(format_record_text(&record))
                }
            }
            HistoryCommands::Delete { record_id } => {
                if store.delete_record(record_id)? {
                    Ok(format!("Deleted history record {}", record_id))
                } else {
                    Err(ApiError::NotFound(format!("History record {}", record_id)))
                }
            }
            HistoryCommands::Search { keyword, format } => {
                let entries = store.search_records(keyword)?;
                if format == "json" {
                    to_pretty_json(&json!({ "keyword": keyword, "records": entries }))
                } else {
                    Ok(format_search_result_text(keyword, &entries))
                }
            }
            HistoryCommands::Stats { format } => {
                let stats = store.statistics()?;
                if format == "json" {
                    to_pretty_json(&stats)
                } else {
                    Ok(format_statistics_text(&stats))
                }
            }
        }
    }

    fn handle_concept_history_command(
        &self,
        command: &ConceptHistoryCommands,
    ) -> Result<String, ApiError> {
        let store = self.concept_history_store()?;
        match command {
            ConceptHistoryCommands::List {
                page,
                page_size,
                status,
                format,
            } => {
                let status = status
                    .as_deref()
                    .map(str::parse::<ConceptRecordStatus>)
                    .transpose()
                    .map_err(ApiError::InvalidInput)?;
                let page = store.list_records(*page, *page_size, status)?;
                if format == "json" {
                    format_concept_page_json(&page)
                } else {
                    Ok(format_concept_page_text(&page))
                }
            }
            ConceptHistoryCommands::Show { record_id, format } => {
                let record = store
                    .get_record(record_id)?
                    .ok_or_else(|| ApiError::NotFound(format!("Concept record {}", record_id)))?;
                if format == "json" {
                    format_concept_record_json(&record)
                } else {
                    Ok(format_concept_record_text(&record))
                }
            }
            ConceptHistoryCommands::Delete { record_id } => {
                let record = store
                    .delete_record(record_id)?
                    .ok_or_else(|| ApiError::NotFound(format!("Concept record {}", record_id)))?;
                let images = LocalImageStore::new(self.storage.history_dir.clone());
                match images.remove_task(&record.task_id) {
                    Ok(removed) => debug!(task_id = %record.task_id, removed, "Concept images removed"),
                    Err(err) => warn!(task_id = %record.task_id, error = %err, "Failed to remove concept images"),
                }
                Ok(format!("Deleted concept record {}", record_id))
            }
        }
    }

    fn handle_providers(&self, format: &str) -> Result<String, ApiError> {
        let summaries = vec![
            ProviderSummary::from_resolution("text", self.config.resolve_text_provider()),
            ProviderSummary::from_resolution("image", self.config.resolve_image_provider()),
        ];
        if format == "json" {
            format_providers_json(&summaries)
        } else {
            Ok(format_providers_text(&summaries))
        }
    }

    fn handle_knowledge(&self, format: &str) -> Result<String, ApiError> {
        let registry = self.knowledge()?;
        if format == "json" {
            to_pretty_json(&json!({
                "frameworks": registry.frameworks().collect::<Vec<_>>(),
                "chart_types": registry.chart_types().collect::<Vec<_>>(),
                "visual_styles": registry.visual_styles().collect::<Vec<_>>(),
            }))
        } else {
            Ok(format_knowledge_text(&registry))
        }
    }

    fn text_client(&self) -> Result<(Arc<dyn ModelProviderClient>, StageOptions), ApiError> {
        let provider = self.config.resolve_text_provider()?;
        let options = self.config.stage_options(&provider);
        let client: Arc<dyn ModelProviderClient> =
            Arc::new(ProviderFactory::create_client(&provider)?);
        info!(provider = %provider.name, model = %provider.config.model, "Text provider resolved");
        Ok((client, options))
    }

    fn coordinator(&self) -> Result<Arc<GenerationCoordinator>, ApiError> {
        let provider = self.config.resolve_image_provider()?;
        let settings = self.config.coordinator_settings(&provider);
        let client: Arc<dyn ModelProviderClient> =
            Arc::new(ProviderFactory::create_client(&provider)?);
        let store: Arc<dyn ImageStore> =
            Arc::new(LocalImageStore::new(self.storage.history_dir.clone()));
        info!(provider = %provider.name, model = %provider.config.model, "Image provider resolved");
        Ok(Arc::new(
            GenerationCoordinator::new(client, store, settings)
                .with_history(self.history_reporter()?),
        ))
    }

    fn history_store(&self) -> Result<LocalHistoryStore, ApiError> {
        Ok(LocalHistoryStore::open(self.storage.history_dir.clone())?)
    }

    fn concept_history_store(&self) -> Result<ConceptHistoryStore, ApiError> {
        Ok(ConceptHistoryStore::open(
            self.storage.history_dir.join(CONCEPT_HISTORY_DIR),
        )?)
    }

    fn history_reporter(&self) -> Result<Arc<dyn HistoryReporter>, ApiError> {
        let store: Arc<dyn HistoryReporter> = Arc::new(self.history_store()?);
        Ok(store)
    }

    fn knowledge(&self) -> Result<KnowledgeRegistry, ApiError> {
        Ok(KnowledgeRegistry::load(&self.storage.knowledge_dir)?)
    }
}

/// Run a future to completion on a fresh multi-thread runtime.
fn block_on<F: std::future::Future>(future: F) -> Result<F::Output, ApiError> {
    if tokio::runtime::Handle::try_current().is_ok() {
        return Err(ApiError::InvalidInput(
            "CLI commands cannot run inside an existing async runtime".to_string(),
        ));
    }
    let runtime = tokio::runtime::Runtime::new()
        .map_err(|e| ApiError::StorageError(StorageError::IoError(e)))?;
    Ok(runtime.block_on(future))
}

/// Read an outline file: JSON as printed by `outline`, or raw outline text.
pub fn load_outline(path: &Path) -> Result<OutlineResult, ApiError> {
    let text = std::fs::read_to_string(path).map_err(|e| {
        ApiError::InvalidInput(format!("Cannot read outline {}: {}", path.display(), e))
    })?;
    if let Ok(outline) = serde_json::from_str::<OutlineResult>(&text) {
        return Ok(outline);
    }
    let pages = parse_outline(&text)?;
    Ok(OutlineResult {
        raw: text,
        pages,
        has_images: false,
    })
}

fn load_images(paths: &[PathBuf]) -> Result<Vec<ImageData>, ApiError> {
    paths
        .iter()
        .map(|path| ImageData::from_file(path).map_err(ApiError::from))
        .collect()
}
