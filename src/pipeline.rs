//! Multi-step pipelines over the stages and the generation coordinator.
//!
//! [`PipelineEvent`] is the stream shared by every pipeline: start, one start and one
//! complete (or skipped) per step, the coordinator's image events in between, and a
//! final complete or error. [`NotePipeline`] runs outline, content and images for a topic.

use crate::content::{ContentStage, NoteContent};
use crate::error::ApiError;
use crate::generation::{
    EventSink, GenerationCoordinator, GenerationRequest, GenerationSummary, PageResult,
    ProgressEvent, SseEvent, DEFAULT_EVENT_BUFFER,
};
use crate::history::HistoryReporter;
use crate::outline::{OutlineResult, OutlineStage};
use crate::provider::{ImageData, ModelProviderClient};
use crate::stage::StageOptions;
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc::Receiver;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// A named, numbered step of a pipeline.
pub trait PipelineStep: Copy + std::fmt::Debug + Send {
    /// 1-based position
    fn number(&self) -> usize;
    fn name(&self) -> &'static str;
}

#[derive(Debug, Clone)]
pub enum PipelineEvent<S, R> {
    Start {
        task_id: String,
        total_steps: usize,
        /// Extra pipeline-specific fields merged into the payload
        meta: Value,
    },
    StepStart(S),
    StepComplete {
        step: S,
        summary: Value,
    },
    StepSkipped {
        step: S,
        reason: String,
    },
    /// Image event forwarded from the coordinator
    Image(ProgressEvent),
    Complete(Box<R>),
    Error {
        step: S,
        message: String,
    },
}

impl<S, R> From<ProgressEvent> for PipelineEvent<S, R> {
    fn from(event: ProgressEvent) -> Self {
        PipelineEvent::Image(event)
    }
}

impl<S: PipelineStep, R: Serialize> SseEvent for PipelineEvent<S, R> {
    fn event_name(&self) -> &'static str {
        match self {
            PipelineEvent::Start { .. } => "pipeline_start",
            PipelineEvent::StepStart(_) => "step_start",
            PipelineEvent::StepComplete { .. } => "step_complete",
            PipelineEvent::StepSkipped { .. } => "step_skipped",
            PipelineEvent::Image(event) => event.event_name(),
            PipelineEvent::Complete(_) => "pipeline_complete",
            PipelineEvent::Error { .. } => "pipeline_error",
        }
    }

    fn payload(&self) -> Value {
        match self {
            PipelineEvent::Start {
                task_id,
                total_steps,
                meta,
            } => {
                let mut payload = json!({ "task_id": task_id, "total_steps": total_steps });
                if let (Some(target), Value::Object(extra)) = (payload.as_object_mut(), meta) {
                    for (key, value) in extra {
                        target.insert(key.clone(), value.clone());
                    }
                }
                payload
            }
            PipelineEvent::StepStart(step) => json!({ "step": step.number(), "name": step.name() }),
            PipelineEvent::StepComplete { step, summary } => json!({
                "step": step.number(),
                "name": step.name(),
                "summary": summary,
            }),
            PipelineEvent::StepSkipped { step, reason } => json!({
                "step": step.number(),
                "name": step.name(),
                "reason": reason,
            }),
            PipelineEvent::Image(event) => event.payload(),
            PipelineEvent::Complete(report) => {
                serde_json::to_value(report.as_ref()).unwrap_or(Value::Null)
            }
            PipelineEvent::Error { step, message } => json!({
                "step": step.number(),
                "name": step.name(),
                "message": message,
            }),
        }
    }
}

/// Pass a step's result through, reporting `pipeline_error` on failure.
pub async fn check_step<S, R, T>(
    sink: &EventSink<PipelineEvent<S, R>>,
    step: S,
    result: Result<T, ApiError>,
) -> Result<T, ApiError>
where
    S: PipelineStep,
    R: Send,
{
    match result {
        Ok(value) => Ok(value),
        Err(err) => {
            error!(step = step.name(), error = %err, "Pipeline step failed");
            sink.emit(PipelineEvent::Error {
                step,
                message: err.to_string(),
            })
            .await;
            Err(err)
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoteStep {
    Outline,
    Content,
    Images,
}

impl PipelineStep for NoteStep {
    fn number(&self) -> usize {
        match self {
            NoteStep::Outline => 1,
            NoteStep::Content => 2,
            NoteStep::Images => 3,
        }
    }

    fn name(&self) -> &'static str {
        match self {
            NoteStep::Outline => "outline",
            NoteStep::Content => "content",
            NoteStep::Images => "images",
        }
    }
}

pub const NOTE_STEPS: usize = 3;

#[derive(Debug, Clone)]
pub struct NoteRequest {
    pub topic: String,
    pub images: Vec<ImageData>,
    pub task_id: Option<String>,
    pub use_reference: bool,
    pub skip_content: bool,
    pub skip_images: bool,
}

impl NoteRequest {
    pub fn new(topic: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            images: Vec::new(),
            task_id: None,
            use_reference: true,
            skip_content: false,
            skip_images: false,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct NoteReport {
    pub task_id: String,
    pub topic: String,
    pub record_id: Option<String>,
    pub outline: OutlineResult,
    pub content: Option<NoteContent>,
    pub images: Vec<PageResult>,
    pub summary: Option<GenerationSummary>,
    pub elapsed_ms: u64,
}

pub type NoteEvent = PipelineEvent<NoteStep, NoteReport>;

pub struct NotePipeline {
    outline: OutlineStage,
    content: ContentStage,
    coordinator: Arc<GenerationCoordinator>,
    history: Option<Arc<dyn HistoryReporter>>,
}

impl NotePipeline {
    pub fn new(
        text_client: Arc<dyn ModelProviderClient>,
        coordinator: Arc<GenerationCoordinator>,
        options: StageOptions,
    ) -> Self {
        Self {
            outline: OutlineStage::new(Arc::clone(&text_client), options.clone()),
            content: ContentStage::new(text_client, options),
            coordinator,
            history: None,
        }
    }

    /// Record each run in history once its outline exists.
    pub fn with_history(mut self, history: Arc<dyn HistoryReporter>) -> Self {
        self.history = Some(history);
        self
    }

    pub async fn run(
        &self,
        request: NoteRequest,
        sink: &EventSink<NoteEvent>,
    ) -> Result<NoteReport, ApiError> {
        let started = Instant::now();
        let task_id = request
            .task_id
            .clone()
            .unwrap_or_else(crate::generation::new_task_id);

        info!(task_id = %task_id, topic = %request.topic, "Starting note pipeline");
        sink.emit(PipelineEvent::Start {
            task_id: task_id.clone(),
            total_steps: NOTE_STEPS,
            meta: json!({ "topic": request.topic }),
        })
        .await;

        sink.emit(PipelineEvent::StepStart(NoteStep::Outline)).await;
        let outline = self
            .outline
            .generate(&request.topic, request.images.clone())
            .await;
        let outline = check_step(sink, NoteStep::Outline, outline).await?;
        sink.emit(PipelineEvent::StepComplete {
            step: NoteStep::Outline,
            summary: json!({ "page_count": outline.pages.len() }),
        })
        .await;

        let record_id = self.create_record(&request.topic, &outline, &task_id);

        let content = if request.skip_content {
            skip_step(sink, NoteStep::Content, "content generation disabled").await;
            None
        } else {
            sink.emit(PipelineEvent::StepStart(NoteStep::Content)).await;
            let content = self.content.generate(&request.topic, &outline.raw).await;
            let content = check_step(sink, NoteStep::Content, content).await?;
            sink.emit(PipelineEvent::StepComplete {
                step: NoteStep::Content,
                summary: json!({
                    "title_count": content.titles.len(),
                    "tag_count": content.tags.len(),
                }),
            })
            .await;
            Some(content)
        };

        let mut images = Vec::new();
        let mut summary = None;
        if request.skip_images {
            skip_step(sink, NoteStep::Images, "image generation disabled").await;
        } else {
            sink.emit(PipelineEvent::StepStart(NoteStep::Images)).await;
            let mut generation = GenerationRequest::new(task_id.clone(), outline.pages.clone())
                .with_outline(outline.raw.clone())
                .with_topic(request.topic.clone())
                .with_user_images(request.images.clone())
                .with_reference(request.use_reference);
            if let Some(record_id) = &record_id {
                generation = generation.with_record_id(record_id.clone());
            }
            let report = self.coordinator.run_generation(generation, sink).await;
            let report = check_step(sink, NoteStep::Images, report).await?;
            sink.emit(PipelineEvent::StepComplete {
                step: NoteStep::Images,
                summary: json!({
                    "total": report.summary.total,
                    "completed": report.summary.completed,
                    "failed": report.summary.failed,
                }),
            })
            .await;
            summary = Some(report.summary);
            images = report.results;
        }

        let report = NoteReport {
            task_id,
            topic: request.topic,
            record_id,
            outline,
            content,
            images,
            summary,
            elapsed_ms: started.elapsed().as_millis() as u64,
        };
        info!(task_id = %report.task_id, elapsed_ms = report.elapsed_ms, "Note pipeline finished");
        sink.emit(PipelineEvent::Complete(Box::new(report.clone())))
            .await;
        Ok(report)
    }

    pub fn spawn(
        self: &Arc<Self>,
        request: NoteRequest,
    ) -> (
        Receiver<NoteEvent>,
        JoinHandle<Result<NoteReport, ApiError>>,
    ) {
        let (sink, receiver) = EventSink::new_pair(DEFAULT_EVENT_BUFFER);
        let pipeline = Arc::clone(self);
        let handle = tokio::spawn(async move { pipeline.run(request, &sink).await });
        (receiver, handle)
    }

    fn create_record(&self, topic: &str, outline: &OutlineResult, task_id: &str) -> Option<String> {
        let history = self.history.as_ref()?;
        match history.create(topic, outline, Some(task_id)) {
            Ok(record_id) => Some(record_id),
            Err(err) => {
                warn!(task_id, error = %err, "Failed to create history record");
                None
            }
        }
    }
}

/// Report a step as skipped.
pub(crate) async fn skip_step<S: PipelineStep, R: Send>(
    sink: &EventSink<PipelineEvent<S, R>>,
    step: S,
    reason: &str,
) {
    info!(step = step.name(), reason, "Skipping pipeline step");
    sink.emit(PipelineEvent::StepSkipped {
        step,
        reason: reason.to_string(),
    })
    .await;
}
