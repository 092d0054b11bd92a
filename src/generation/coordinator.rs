//! Generation coordinator: bounded fan-out of page image jobs for one task.
//!
//! Jobs start in index order, at most `limit` at a time; each finished job frees a slot
//! for the next pending page. Every page gets exactly one terminal event per run and the
//! run ends with a single `finish` (or `retry_finish`) event.

use super::events::ProgressEvent;
use super::job::{ImageOptions, JobOutcome, PageImageJob};
use super::page::{ConcurrencyMode, GenerationSummary, Page, PageResult, PageStatus, PageType};
use super::sink::{EventSink, DEFAULT_EVENT_BUFFER};
use crate::error::ApiError;
use crate::history::{HistoryReporter, RecordImages, RecordStatus, RecordUpdate};
use crate::prompt::PagePromptTemplate;
use crate::provider::{ImageData, ModelProviderClient};
use crate::storage::ImageStore;
use futures::stream::{FuturesUnordered, StreamExt};
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::Arc;
use tokio::sync::mpsc::Receiver;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Tasks remembered for retries when the settings do not say otherwise.
pub const DEFAULT_RETAINED_TASKS: usize = 32;

/// Fresh task id in the `task_xxxxxxxx` form.
pub fn new_task_id() -> String {
    let id = uuid::Uuid::new_v4().simple().to_string();
    format!("task_{}", &id[..8])
}

/// Coordinator-wide settings, fixed when the coordinator is built.
#[derive(Debug, Clone)]
pub struct CoordinatorSettings {
    pub mode: ConcurrencyMode,
    pub image: ImageOptions,
    /// Template used when a request does not bring its own
    pub prompt: PagePromptTemplate,
    /// Upper bound on remembered task states; in-flight tasks are never dropped
    pub retained_tasks: usize,
}

impl Default for CoordinatorSettings {
    fn default() -> Self {
        Self {
            mode: ConcurrencyMode::default(),
            image: ImageOptions::default(),
            prompt: PagePromptTemplate::default(),
            retained_tasks: DEFAULT_RETAINED_TASKS,
        }
    }
}

/// Inbound trigger for a full run.
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub task_id: String,
    pub pages: Vec<Page>,
    pub full_outline: String,
    pub user_images: Vec<ImageData>,
    pub user_topic: Option<String>,
    /// Feed the cover image to every later page as a style reference
    pub use_reference: bool,
    pub record_id: Option<String>,
    pub prompt: Option<PagePromptTemplate>,
    /// Output file name per index; `{index}.png` when absent
    pub file_names: HashMap<usize, String>,
}

impl GenerationRequest {
    pub fn new(task_id: impl Into<String>, pages: Vec<Page>) -> Self {
        Self {
            task_id: task_id.into(),
            pages,
            full_outline: String::new(),
            user_images: Vec::new(),
            user_topic: None,
            use_reference: true,
            record_id: None,
            prompt: None,
            file_names: HashMap::new(),
        }
    }

    pub fn with_outline(mut self, full_outline: impl Into<String>) -> Self {
        self.full_outline = full_outline.into();
        self
    }

    pub fn with_topic(mut self, topic: impl Into<String>) -> Self {
        self.user_topic = Some(topic.into());
        self
    }

    pub fn with_user_images(mut self, images: Vec<ImageData>) -> Self {
        self.user_images = images;
        self
    }

    pub fn with_reference(mut self, use_reference: bool) -> Self {
        self.use_reference = use_reference;
        self
    }

    pub fn with_record_id(mut self, record_id: impl Into<String>) -> Self {
        self.record_id = Some(record_id.into());
        self
    }

    pub fn with_prompt(mut self, prompt: PagePromptTemplate) -> Self {
        self.prompt = Some(prompt);
        self
    }

    pub fn with_file_names(mut self, file_names: HashMap<usize, String>) -> Self {
        self.file_names = file_names;
        self
    }
}

/// Result of one run (full or retry).
#[derive(Debug, Clone)]
pub struct GenerationReport {
    pub task_id: String,
    pub summary: GenerationSummary,
    /// Terminal results for the pages of this run, by index
    pub results: Vec<PageResult>,
}

impl GenerationReport {
    pub fn failed_indices(&self) -> Vec<usize> {
        self.results
            .iter()
            .filter(|r| r.status == PageStatus::Error)
            .map(|r| r.index)
            .collect()
    }
}

/// What a task remembers between its first run and later retries.
struct TaskState {
    full_outline: String,
    user_topic: Option<String>,
    user_images: Vec<ImageData>,
    use_reference: bool,
    record_id: Option<String>,
    prompt: PagePromptTemplate,
    file_names: HashMap<usize, String>,
    cover_index: Option<usize>,
    cover_image: Option<ImageData>,
    total_pages: usize,
    results: BTreeMap<usize, PageResult>,
}

impl TaskState {
    fn from_request(request: &GenerationRequest, prompt: PagePromptTemplate) -> Self {
        Self {
            full_outline: request.full_outline.clone(),
            user_topic: request.user_topic.clone(),
            user_images: request.user_images.clone(),
            use_reference: request.use_reference,
            record_id: request.record_id.clone(),
            prompt,
            file_names: request.file_names.clone(),
            cover_index: cover_index(&request.pages),
            cover_image: None,
            total_pages: request.pages.len(),
            results: request
                .pages
                .iter()
                .map(|p| (p.index, PageResult::pending(p.index)))
                .collect(),
        }
    }

    fn plan(&self, task_id: &str) -> RunPlan {
        RunPlan {
            task_id: task_id.to_string(),
            full_outline: self.full_outline.clone(),
            user_topic: self.user_topic.clone(),
            user_images: self.user_images.clone(),
            use_reference: self.use_reference,
            prompt: self.prompt.clone(),
            file_names: self.file_names.clone(),
            cover_index: self.cover_index,
            cover_image: self.cover_image.clone(),
        }
    }

    fn history_update(&self, task_id: &str) -> RecordUpdate {
        let generated: Vec<String> = self
            .results
            .values()
            .filter(|r| r.status == PageStatus::Done)
            .filter_map(|r| r.file_name.clone())
            .collect();
        let status = RecordStatus::from_counts(generated.len(), self.total_pages);
        RecordUpdate {
            images: Some(RecordImages {
                task_id: Some(task_id.to_string()),
                generated,
            }),
            status: Some(status),
            thumbnail: self.thumbnail(),
            ..Default::default()
        }
    }

    /// Cover image file once it exists, else the first generated page.
    fn thumbnail(&self) -> Option<String> {
        let done = |r: &&PageResult| r.status == PageStatus::Done;
        self.cover_index
            .and_then(|ci| self.results.get(&ci))
            .filter(done)
            .or_else(|| self.results.values().find(done))
            .and_then(|r| r.file_name.clone())
    }
}

/// Remembered task states in insertion order.
///
/// Beyond `capacity` the oldest idle task is dropped; tasks with a run in flight
/// stay until that run has recorded its results.
struct TaskCache {
    capacity: usize,
    states: HashMap<String, TaskState>,
    order: VecDeque<String>,
    active: HashMap<String, usize>,
}

impl TaskCache {
    fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            states: HashMap::new(),
            order: VecDeque::new(),
            active: HashMap::new(),
        }
    }

    fn insert(&mut self, task_id: &str, state: TaskState) {
        if self.states.insert(task_id.to_string(), state).is_some() {
            self.order.retain(|id| id != task_id);
        }
        self.order.push_back(task_id.to_string());
        self.evict_overflow();
    }

    fn contains(&self, task_id: &str) -> bool {
        self.states.contains_key(task_id)
    }

    fn get(&self, task_id: &str) -> Option<&TaskState> {
        self.states.get(task_id)
    }

    fn get_mut(&mut self, task_id: &str) -> Option<&mut TaskState> {
        self.states.get_mut(task_id)
    }

    fn remove(&mut self, task_id: &str) -> bool {
        self.order.retain(|id| id != task_id);
        self.states.remove(task_id).is_some()
    }

    fn len(&self) -> usize {
        self.states.len()
    }

    fn begin(&mut self, task_id: &str) {
        *self.active.entry(task_id.to_string()).or_insert(0) += 1;
    }

    fn end(&mut self, task_id: &str) {
        if let Some(count) = self.active.get_mut(task_id) {
            *count -= 1;
            if *count == 0 {
                self.active.remove(task_id);
            }
        }
        self.evict_overflow();
    }

    fn evict_overflow(&mut self) {
        let mut busy = Vec::new();
        while self.states.len() > self.capacity {
            let Some(task_id) = self.order.pop_front() else {
                break;
            };
            if self.active.contains_key(&task_id) {
                busy.push(task_id);
                continue;
            }
            self.states.remove(&task_id);
            debug!(task_id = %task_id, "Dropped remembered task state");
        }
        for task_id in busy.into_iter().rev() {
            self.order.push_front(task_id);
        }
    }
}

/// Marks a task as in flight until dropped.
struct ActiveRun<'a> {
    tasks: &'a RwLock<TaskCache>,
    task_id: String,
}

impl<'a> ActiveRun<'a> {
    fn begin(tasks: &'a RwLock<TaskCache>, task_id: &str) -> Self {
        tasks.write().begin(task_id);
        Self {
            tasks,
            task_id: task_id.to_string(),
        }
    }
}

impl Drop for ActiveRun<'_> {
    fn drop(&mut self) {
        self.tasks.write().end(&self.task_id);
    }
}

/// Everything a run needs besides the pages themselves.
struct RunPlan {
    task_id: String,
    full_outline: String,
    user_topic: Option<String>,
    user_images: Vec<ImageData>,
    use_reference: bool,
    prompt: PagePromptTemplate,
    file_names: HashMap<usize, String>,
    cover_index: Option<usize>,
    cover_image: Option<ImageData>,
}

/// First cover page, else the lowest index.
fn cover_index(pages: &[Page]) -> Option<usize> {
    pages
        .iter()
        .find(|p| p.page_type == PageType::Cover)
        .or_else(|| pages.iter().min_by_key(|p| p.index))
        .map(|p| p.index)
}

fn validate_pages(task_id: &str, pages: &[Page]) -> Result<(), ApiError> {
    if task_id.is_empty()
        || !task_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        return Err(ApiError::InvalidInput(format!("Invalid task id: {:?}", task_id)));
    }
    let mut seen = HashSet::new();
    for page in pages {
        if !seen.insert(page.index) {
            return Err(ApiError::InvalidInput(format!(
                "Duplicate page index {} in task {}",
                page.index, task_id
            )));
        }
    }
    Ok(())
}

fn to_result(outcome: &JobOutcome) -> PageResult {
    match &outcome.result {
        Ok(stored) => PageResult::done(
            outcome.index,
            stored.image_url.clone(),
            stored.file_name.clone(),
        ),
        Err(reason) => PageResult::failed(outcome.index, reason.clone()),
    }
}

fn summarize(results: &[PageResult]) -> GenerationSummary {
    let completed = results
        .iter()
        .filter(|r| r.status == PageStatus::Done)
        .count();
    GenerationSummary::new(completed, results.len() - completed)
}

pub struct GenerationCoordinator {
    image_client: Arc<dyn ModelProviderClient>,
    store: Arc<dyn ImageStore>,
    history: Option<Arc<dyn HistoryReporter>>,
    settings: CoordinatorSettings,
    tasks: RwLock<TaskCache>,
}

impl GenerationCoordinator {
    pub fn new(
        image_client: Arc<dyn ModelProviderClient>,
        store: Arc<dyn ImageStore>,
        settings: CoordinatorSettings,
    ) -> Self {
        let tasks = RwLock::new(TaskCache::new(settings.retained_tasks));
        Self {
            image_client,
            store,
            history: None,
            settings,
            tasks,
        }
    }

    pub fn with_history(mut self, history: Arc<dyn HistoryReporter>) -> Self {
        self.history = Some(history);
        self
    }

    pub fn settings(&self) -> &CoordinatorSettings {
        &self.settings
    }

    /// Run every page of a task and stream its progress.
    pub async fn run_generation<E>(
        &self,
        request: GenerationRequest,
        sink: &EventSink<E>,
    ) -> Result<GenerationReport, ApiError>
    where
        E: From<ProgressEvent> + Send,
    {
        validate_pages(&request.task_id, &request.pages)?;

        let prompt = request
            .prompt
            .clone()
            .unwrap_or_else(|| self.settings.prompt.clone());
        let state = TaskState::from_request(&request, prompt);
        let plan = state.plan(&request.task_id);
        let total = request.pages.len();
        let _active = ActiveRun::begin(&self.tasks, &request.task_id);
        self.tasks.write().insert(&request.task_id, state);

        info!(
            task_id = %request.task_id,
            pages = total,
            limit = self.settings.mode.effective_limit(total),
            use_reference = request.use_reference,
            "Starting page generation"
        );

        if total > 0 {
            self.report_history(
                request.record_id.as_deref(),
                RecordUpdate {
                    images: Some(RecordImages {
                        task_id: Some(request.task_id.clone()),
                        generated: Vec::new(),
                    }),
                    status: Some(RecordStatus::Generating),
                    ..Default::default()
                },
            );
        }

        let mut pages = request.pages;
        pages.sort_by_key(|p| p.index);
        let (results, cover_image) = self.run_pages(&plan, pages, true, sink).await;

        let summary = summarize(&results);
        self.record_results(&plan.task_id, &results, cover_image, total > 0);

        info!(
            task_id = %plan.task_id,
            completed = summary.completed,
            failed = summary.failed,
            "Page generation finished"
        );
        sink.emit(ProgressEvent::Finish(summary)).await;

        Ok(GenerationReport {
            task_id: plan.task_id,
            summary,
            results,
        })
    }

    /// Re-run exactly the given pages of an earlier task.
    ///
    /// The page list is trusted as the failed subset; it is not re-derived from
    /// remembered results.
    pub async fn retry_failed<E>(
        &self,
        task_id: &str,
        pages: Vec<Page>,
        sink: &EventSink<E>,
    ) -> Result<GenerationReport, ApiError>
    where
        E: From<ProgressEvent> + Send,
    {
        validate_pages(task_id, &pages)?;

        if pages.is_empty() {
            let summary = GenerationSummary::empty();
            sink.emit(ProgressEvent::RetryFinish(summary)).await;
            return Ok(GenerationReport {
                task_id: task_id.to_string(),
                summary,
                results: Vec::new(),
            });
        }

        sink.emit(ProgressEvent::RetryStart {
            message: format!("Retrying {} failed page(s)", pages.len()),
        })
        .await;

        let _active = ActiveRun::begin(&self.tasks, task_id);
        let plan = {
            let mut tasks = self.tasks.write();
            if !tasks.contains(task_id) {
                warn!(
                    task_id,
                    "No remembered state for task; retrying without outline or cover reference"
                );
                let request = GenerationRequest::new(task_id, pages.clone()).with_reference(false);
                tasks.insert(
                    task_id,
                    TaskState::from_request(&request, self.settings.prompt.clone()),
                );
            }
            match tasks.get(task_id) {
                Some(state) => state.plan(task_id),
                None => {
                    return Err(ApiError::NotFound(format!("task state for {}", task_id)));
                }
            }
        };

        info!(task_id, pages = pages.len(), "Retrying failed pages");

        let mut pages = pages;
        pages.sort_by_key(|p| p.index);
        let (results, cover_image) = self.run_pages(&plan, pages, false, sink).await;

        let summary = summarize(&results);
        self.record_results(task_id, &results, cover_image, true);
        sink.emit(ProgressEvent::RetryFinish(summary)).await;

        Ok(GenerationReport {
            task_id: task_id.to_string(),
            summary,
            results,
        })
    }

    /// Seed task state from a previous run whose images are already on disk.
    ///
    /// Pages with a stored image count as done; the stored cover becomes the reference
    /// for a later retry. Returns the indices that have no image yet.
    pub fn restore_task(&self, request: &GenerationRequest) -> Result<Vec<usize>, ApiError> {
        validate_pages(&request.task_id, &request.pages)?;
        let prompt = request
            .prompt
            .clone()
            .unwrap_or_else(|| self.settings.prompt.clone());
        let mut state = TaskState::from_request(request, prompt);
        let mut missing = Vec::new();

        for page in &request.pages {
            let file_name = file_name_for(&state.file_names, page.index);
            match self.store.load(&request.task_id, &file_name) {
                Ok(image) => {
                    if state.cover_index == Some(page.index) {
                        state.cover_image = Some(image);
                    }
                    let url = crate::storage::image_url(&request.task_id, &file_name);
                    state
                        .results
                        .insert(page.index, PageResult::done(page.index, url, file_name));
                }
                Err(_) => missing.push(page.index),
            }
        }

        missing.sort_unstable();
        self.tasks.write().insert(&request.task_id, state);
        Ok(missing)
    }

    /// Forget everything remembered about a task.
    ///
    /// A later retry of the task runs without its outline or cover reference. Returns
    /// false when nothing was remembered.
    pub fn cleanup_task(&self, task_id: &str) -> bool {
        let removed = self.tasks.write().remove(task_id);
        if removed {
            debug!(task_id, "Task state released");
        }
        removed
    }

    /// Number of tasks whose state is currently remembered.
    pub fn retained_tasks(&self) -> usize {
        self.tasks.read().len()
    }

    /// Latest known result per page of a task.
    pub fn task_results(&self, task_id: &str) -> Option<Vec<PageResult>> {
        self.tasks
            .read()
            .get(task_id)
            .map(|state| state.results.values().cloned().collect())
    }

    /// Spawn a full run; events arrive on the returned receiver.
    pub fn spawn_generation(
        self: &Arc<Self>,
        request: GenerationRequest,
    ) -> (
        Receiver<ProgressEvent>,
        JoinHandle<Result<GenerationReport, ApiError>>,
    ) {
        let (sink, receiver) = EventSink::new_pair(DEFAULT_EVENT_BUFFER);
        let coordinator = Arc::clone(self);
        let handle = tokio::spawn(async move { coordinator.run_generation(request, &sink).await });
        (receiver, handle)
    }

    /// Spawn a retry run; events arrive on the returned receiver.
    pub fn spawn_retry(
        self: &Arc<Self>,
        task_id: String,
        pages: Vec<Page>,
    ) -> (
        Receiver<ProgressEvent>,
        JoinHandle<Result<GenerationReport, ApiError>>,
    ) {
        let (sink, receiver) = EventSink::new_pair(DEFAULT_EVENT_BUFFER);
        let coordinator = Arc::clone(self);
        let handle =
            tokio::spawn(async move { coordinator.retry_failed(&task_id, pages, &sink).await });
        (receiver, handle)
    }

    /// Cover first (when it should seed the others), then everything else.
    async fn run_pages<E>(
        &self,
        plan: &RunPlan,
        mut pages: Vec<Page>,
        announce_start: bool,
        sink: &EventSink<E>,
    ) -> (Vec<PageResult>, Option<ImageData>)
    where
        E: From<ProgressEvent> + Send,
    {
        let mut outcomes = Vec::with_capacity(pages.len());
        let mut cover_image = None;
        let user_images = Arc::new(plan.user_images.clone());

        let cover_position = plan
            .cover_index
            .and_then(|ci| pages.iter().position(|p| p.index == ci));

        if plan.use_reference && plan.cover_image.is_none() && pages.len() > 1 {
            if let Some(position) = cover_position {
                let cover = pages.remove(position);
                let cover_outcomes = self
                    .run_batch(plan, vec![cover], Arc::clone(&user_images), announce_start, sink)
                    .await;
                outcomes.extend(cover_outcomes);
            }
        }

        let mut references = Vec::with_capacity(plan.user_images.len() + 1);
        if plan.use_reference {
            let fresh_cover = outcomes
                .iter()
                .find(|o| Some(o.index) == plan.cover_index)
                .and_then(|o| o.image.clone());
            if let Some(cover) = fresh_cover.or_else(|| plan.cover_image.clone()) {
                references.push(cover);
            }
        }
        references.extend(plan.user_images.iter().cloned());

        let rest = self
            .run_batch(plan, pages, Arc::new(references), announce_start, sink)
            .await;
        outcomes.extend(rest);

        for outcome in &mut outcomes {
            if Some(outcome.index) == plan.cover_index {
                cover_image = outcome.image.take();
            }
        }

        let mut results: Vec<PageResult> = outcomes.iter().map(to_result).collect();
        results.sort_by_key(|r| r.index);
        (results, cover_image)
    }

    /// FIFO by index, at most `limit` jobs in flight.
    async fn run_batch<E>(
        &self,
        plan: &RunPlan,
        pages: Vec<Page>,
        references: Arc<Vec<ImageData>>,
        announce_start: bool,
        sink: &EventSink<E>,
    ) -> Vec<JobOutcome>
    where
        E: From<ProgressEvent> + Send,
    {
        let limit = self.settings.mode.effective_limit(pages.len());
        let mut pending: VecDeque<Page> = pages.into();
        let mut in_flight = FuturesUnordered::new();
        let mut outcomes = Vec::with_capacity(pending.len());

        loop {
            while in_flight.len() < limit {
                let Some(page) = pending.pop_front() else {
                    break;
                };
                if announce_start {
                    sink.emit(ProgressEvent::Progress {
                        index: page.index,
                        status: PageStatus::Generating,
                    })
                    .await;
                }
                let job = self.build_job(plan, page, Arc::clone(&references));
                in_flight.push(job.run(
                    self.image_client.as_ref(),
                    self.store.as_ref(),
                    &self.settings.image,
                ));
            }

            let Some(outcome) = in_flight.next().await else {
                break;
            };
            let event = match &outcome.result {
                Ok(stored) => ProgressEvent::Complete {
                    index: outcome.index,
                    image_url: stored.image_url.clone(),
                },
                Err(message) => ProgressEvent::Error {
                    index: outcome.index,
                    message: message.clone(),
                },
            };
            sink.emit(event).await;
            outcomes.push(outcome);
        }

        outcomes
    }

    fn build_job(&self, plan: &RunPlan, page: Page, references: Arc<Vec<ImageData>>) -> PageImageJob {
        let prompt = plan.prompt.render(
            &page.content,
            page.page_type.label(),
            &plan.full_outline,
            plan.user_topic.as_deref(),
        );
        PageImageJob {
            task_id: plan.task_id.clone(),
            file_name: file_name_for(&plan.file_names, page.index),
            page,
            prompt,
            reference_images: references,
        }
    }

    /// Fold run results into task state and report to history.
    fn record_results(
        &self,
        task_id: &str,
        results: &[PageResult],
        cover_image: Option<ImageData>,
        report: bool,
    ) {
        let update = {
            let mut tasks = self.tasks.write();
            let Some(state) = tasks.get_mut(task_id) else {
                debug!(task_id, "Task state released during run; results not remembered");
                return;
            };
            for result in results {
                state.results.insert(result.index, result.clone());
            }
            if cover_image.is_some() {
                state.cover_image = cover_image;
            }
            state
                .record_id
                .clone()
                .map(|record_id| (record_id, state.history_update(task_id)))
        };

        if report {
            if let Some((record_id, update)) = update {
                self.report_history(Some(&record_id), update);
            }
        }
    }

    /// Fire-and-forget history write; failures are logged, never propagated.
    fn report_history(&self, record_id: Option<&str>, update: RecordUpdate) {
        let (Some(history), Some(record_id)) = (&self.history, record_id) else {
            return;
        };
        match history.update(record_id, update) {
            Ok(true) => {}
            Ok(false) => warn!(record_id, "History record not found; skipping update"),
            Err(err) => warn!(record_id, error = %err, "Failed to update history record"),
        }
    }
}

fn file_name_for(file_names: &HashMap<usize, String>, index: usize) -> String {
    file_names
        .get(&index)
        .cloned()
        .unwrap_or_else(|| format!("{}.png", index))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ProviderError, StorageError};
    use crate::history::LocalHistoryStore;
    use crate::provider::ImageRequest;
    use crate::storage::LocalImageStore;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use tempfile::TempDir;

    /// Image provider failing on chosen prompts; records reference counts per prompt.
    struct ScriptedImages {
        fail_marker: Mutex<Option<String>>,
        references_seen: Mutex<Vec<(String, usize)>>,
    }

    impl ScriptedImages {
        fn new(fail_marker: Option<&str>) -> Self {
            Self {
                fail_marker: Mutex::new(fail_marker.map(str::to_string)),
                references_seen: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl ModelProviderClient for ScriptedImages {
        async fn generate_text(
            &self,
            _request: crate::provider::TextRequest,
        ) -> Result<String, ProviderError> {
            Err(ProviderError::InvalidResponse("text not scripted".into()))
        }

        async fn generate_image(&self, request: ImageRequest) -> Result<ImageData, ProviderError> {
            self.references_seen
                .lock()
                .push((request.prompt.clone(), request.reference_images.len()));
            if let Some(marker) = self.fail_marker.lock().as_deref() {
                if request.prompt.contains(marker) {
                    return Err(ProviderError::RateLimited("scripted".into()));
                }
            }
            Ok(ImageData::new(vec![0x89, b'P', b'N', b'G', request.prompt.len() as u8]))
        }

        fn provider_name(&self) -> &str {
            "scripted"
        }

        fn model_name(&self) -> &str {
            "scripted"
        }
    }

    fn pages(n: usize) -> Vec<Page> {
        (0..n)
            .map(|i| {
                let page_type = if i == 0 { PageType::Cover } else { PageType::Content };
                Page::new(i, page_type, format!("page-{}", i))
            })
            .collect()
    }

    fn coordinator(
        provider: Arc<ScriptedImages>,
        temp_dir: &TempDir,
        mode: ConcurrencyMode,
    ) -> GenerationCoordinator {
        GenerationCoordinator::new(
            provider,
            Arc::new(LocalImageStore::new(temp_dir.path())),
            CoordinatorSettings {
                mode,
                prompt: PagePromptTemplate::custom("{page_content}"),
                ..Default::default()
            },
        )
    }

    async fn collect(mut rx: Receiver<ProgressEvent>) -> Vec<ProgressEvent> {
        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            events.push(event);
        }
        events
    }

    #[tokio::test]
    async fn test_cover_seeds_reference_for_remaining_pages() {
        let temp_dir = TempDir::new().unwrap();
        let provider = Arc::new(ScriptedImages::new(None));
        let coordinator = coordinator(provider.clone(), &temp_dir, ConcurrencyMode::Bounded(3));

        let request = GenerationRequest::new("task_ref", pages(3))
            .with_user_images(vec![ImageData::new(vec![0xFF, 0xD8])]);
        let report = coordinator
            .run_generation(request, &EventSink::<ProgressEvent>::detached())
            .await
            .unwrap();
        assert!(report.summary.success);

        let seen = provider.references_seen.lock().clone();
        assert_eq!(seen[0], ("page-0".to_string(), 1));
        assert!(seen[1..].iter().all(|(_, refs)| *refs == 2));
    }

    #[tokio::test]
    async fn test_without_reference_only_user_images_are_sent() {
        let temp_dir = TempDir::new().unwrap();
        let provider = Arc::new(ScriptedImages::new(None));
        let coordinator = coordinator(provider.clone(), &temp_dir, ConcurrencyMode::Sequential);

        let request = GenerationRequest::new("task_noref", pages(3)).with_reference(false);
        coordinator
            .run_generation(request, &EventSink::<ProgressEvent>::detached())
            .await
            .unwrap();

        let seen = provider.references_seen.lock().clone();
        assert_eq!(seen.len(), 3);
        assert!(seen.iter().all(|(_, refs)| *refs == 0));
    }

    #[tokio::test]
    async fn test_failed_cover_does_not_block_other_pages() {
        let temp_dir = TempDir::new().unwrap();
        let provider = Arc::new(ScriptedImages::new(Some("page-0")));
        let coordinator = Arc::new(coordinator(provider, &temp_dir, ConcurrencyMode::Bounded(2)));

        let (rx, handle) = coordinator.spawn_generation(GenerationRequest::new("task_c", pages(4)));
        let events = collect(rx).await;
        let report = handle.await.unwrap().unwrap();

        assert_eq!(report.summary, GenerationSummary::new(3, 1));
        assert_eq!(report.failed_indices(), vec![0]);
        assert_eq!(
            events.last(),
            Some(&ProgressEvent::Finish(GenerationSummary::new(3, 1)))
        );
    }

    #[tokio::test]
    async fn test_retry_uses_remembered_cover_and_updates_results() {
        let temp_dir = TempDir::new().unwrap();
        let provider = Arc::new(ScriptedImages::new(Some("page-2")));
        let coordinator = Arc::new(coordinator(provider.clone(), &temp_dir, ConcurrencyMode::Bounded(3)));

        let all = pages(4);
        let report = coordinator
            .run_generation(
                GenerationRequest::new("task_r", all.clone()),
                &EventSink::<ProgressEvent>::detached(),
            )
            .await
            .unwrap();
        assert_eq!(report.failed_indices(), vec![2]);

        *provider.fail_marker.lock() = None;
        provider.references_seen.lock().clear();

        let (rx, handle) = coordinator.spawn_retry("task_r".to_string(), vec![all[2].clone()]);
        let events = collect(rx).await;
        let retry = handle.await.unwrap().unwrap();

        assert_eq!(retry.summary, GenerationSummary::new(1, 0));
        assert!(matches!(events[0], ProgressEvent::RetryStart { .. }));
        assert!(matches!(events[1], ProgressEvent::Complete { index: 2, .. }));
        assert_eq!(events.len(), 3);
        assert_eq!(provider.references_seen.lock()[0].1, 1);

        let results = coordinator.task_results("task_r").unwrap();
        assert!(results.iter().all(|r| r.status == PageStatus::Done));
    }

    #[tokio::test]
    async fn test_restore_task_from_disk() {
        let temp_dir = TempDir::new().unwrap();
        let provider = Arc::new(ScriptedImages::new(Some("page-1")));
        let first = coordinator(provider.clone(), &temp_dir, ConcurrencyMode::Sequential);
        first
            .run_generation(
                GenerationRequest::new("task_disk", pages(3)),
                &EventSink::<ProgressEvent>::detached(),
            )
            .await
            .unwrap();

        let second = coordinator(provider, &temp_dir, ConcurrencyMode::Sequential);
        let missing = second
            .restore_task(&GenerationRequest::new("task_disk", pages(3)))
            .unwrap();
        assert_eq!(missing, vec![1]);
    }

    #[tokio::test]
    async fn test_invalid_requests_are_rejected_before_any_event() {
        let temp_dir = TempDir::new().unwrap();
        let provider = Arc::new(ScriptedImages::new(None));
        let coordinator = coordinator(provider, &temp_dir, ConcurrencyMode::Sequential);
        let (sink, mut rx) = EventSink::<ProgressEvent>::new_pair(8);

        let duplicate = vec![Page::new(1, PageType::Content, "a"), Page::new(1, PageType::Content, "b")];
        assert!(matches!(
            coordinator
                .run_generation(GenerationRequest::new("task_dup", duplicate), &sink)
                .await,
            Err(ApiError::InvalidInput(_))
        ));
        assert!(matches!(
            coordinator
                .run_generation(GenerationRequest::new("../escape", pages(1)), &sink)
                .await,
            Err(ApiError::InvalidInput(_))
        ));
        drop(sink);
        assert!(rx.recv().await.is_none());
    }

    /// History backend whose writes always fail.
    #[derive(Default)]
    struct FailingHistory {
        updates: Mutex<usize>,
    }

    impl HistoryReporter for FailingHistory {
        fn create(
            &self,
            _topic: &str,
            _outline: &crate::outline::OutlineResult,
            _task_id: Option<&str>,
        ) -> Result<String, StorageError> {
            Err(StorageError::Serialization("disk full".into()))
        }

        fn update(&self, _record_id: &str, _update: RecordUpdate) -> Result<bool, StorageError> {
            *self.updates.lock() += 1;
            Err(StorageError::Serialization("disk full".into()))
        }
    }

    #[tokio::test]
    async fn test_history_failures_do_not_fail_runs() {
        let temp_dir = TempDir::new().unwrap();
        let provider = Arc::new(ScriptedImages::new(None));
        let history = Arc::new(FailingHistory::default());
        let coordinator = coordinator(provider, &temp_dir, ConcurrencyMode::Bounded(3))
            .with_history(history.clone());

        let coordinator = &coordinator;
        let all = pages(3);

        let (sink, rx) = EventSink::<ProgressEvent>::new_pair(32);
        let request = GenerationRequest::new("task_hist", all.clone()).with_record_id("rec_1");
        let (report, events) = tokio::join!(
            async move { coordinator.run_generation(request, &sink).await },
            collect(rx)
        );
        let report = report.unwrap();
        assert!(report.summary.success);
        assert_eq!(report.summary, GenerationSummary::new(3, 0));
        assert_eq!(
            events.last(),
            Some(&ProgressEvent::Finish(GenerationSummary::new(3, 0)))
        );
        assert_eq!(*history.updates.lock(), 2);

        let (sink, rx) = EventSink::<ProgressEvent>::new_pair(32);
        let retry_pages = vec![all[2].clone()];
        let (retry, events) = tokio::join!(
            async move { coordinator.retry_failed("task_hist", retry_pages, &sink).await },
            collect(rx)
        );
        assert!(retry.unwrap().summary.success);
        assert_eq!(
            events.last(),
            Some(&ProgressEvent::RetryFinish(GenerationSummary::new(1, 0)))
        );
        assert_eq!(*history.updates.lock(), 3);
    }

    #[tokio::test]
    async fn test_thumbnail_follows_cover() {
        let temp_dir = TempDir::new().unwrap();
        let store = Arc::new(LocalHistoryStore::open(temp_dir.path().join("history")).unwrap());
        let outline = crate::outline::OutlineResult {
            raw: String::new(),
            pages: pages(3),
            has_images: false,
        };
        let record_id = store.create_record("nails", &outline, None).unwrap();

        let provider = Arc::new(ScriptedImages::new(Some("page-0")));
        let coordinator = coordinator(provider.clone(), &temp_dir, ConcurrencyMode::Bounded(2))
            .with_history(store.clone());
        let all = pages(3);
        coordinator
            .run_generation(
                GenerationRequest::new("task_thumb", all.clone()).with_record_id(&record_id),
                &EventSink::<ProgressEvent>::detached(),
            )
            .await
            .unwrap();
        let record = store.get_record(&record_id).unwrap().unwrap();
        assert_eq!(record.status, RecordStatus::Partial);
        assert_eq!(record.thumbnail.as_deref(), Some("1.png"));

        *provider.fail_marker.lock() = None;
        coordinator
            .retry_failed(
                "task_thumb",
                vec![all[0].clone()],
                &EventSink::<ProgressEvent>::detached(),
            )
            .await
            .unwrap();
        let record = store.get_record(&record_id).unwrap().unwrap();
        assert_eq!(record.status, RecordStatus::Completed);
        assert_eq!(record.thumbnail.as_deref(), Some("0.png"));
        assert_eq!(store.list_records(1, 10, None).unwrap().records[0].thumbnail.as_deref(), Some("0.png"));
    }

    #[tokio::test]
    async fn test_cleanup_task_releases_state() {
        let temp_dir = TempDir::new().unwrap();
        let provider = Arc::new(ScriptedImages::new(None));
        let coordinator = coordinator(provider, &temp_dir, ConcurrencyMode::Sequential);

        coordinator
            .run_generation(
                GenerationRequest::new("task_clean", pages(2))
                    .with_user_images(vec![ImageData::new(vec![0u8; 64 * 1024])]),
                &EventSink::<ProgressEvent>::detached(),
            )
            .await
            .unwrap();
        assert_eq!(coordinator.retained_tasks(), 1);

        assert!(coordinator.cleanup_task("task_clean"));
        assert!(!coordinator.cleanup_task("task_clean"));
        assert_eq!(coordinator.retained_tasks(), 0);
        assert!(coordinator.task_results("task_clean").is_none());
    }

    #[tokio::test]
    async fn test_remembered_tasks_are_bounded() {
        let temp_dir = TempDir::new().unwrap();
        let provider = Arc::new(ScriptedImages::new(None));
        let coordinator = GenerationCoordinator::new(
            provider,
            Arc::new(LocalImageStore::new(temp_dir.path())),
            CoordinatorSettings {
                mode: ConcurrencyMode::Sequential,
                prompt: PagePromptTemplate::custom("{page_content}"),
                retained_tasks: 3,
                ..Default::default()
            },
        );

        for i in 0..20 {
            coordinator
                .run_generation(
                    GenerationRequest::new(format!("task_{}", i), pages(1))
                        .with_user_images(vec![ImageData::new(vec![0u8; 1024])]),
                    &EventSink::<ProgressEvent>::detached(),
                )
                .await
                .unwrap();
        }

        assert_eq!(coordinator.retained_tasks(), 3);
        assert!(coordinator.task_results("task_0").is_none());
        assert!(coordinator.task_results("task_16").is_none());
        assert!(coordinator.task_results("task_17").is_some());
        assert!(coordinator.task_results("task_19").is_some());
    }

    #[test]
    fn test_task_cache_keeps_in_flight_tasks() {
        let state = || {
            TaskState::from_request(
                &GenerationRequest::new("t", pages(1)),
                PagePromptTemplate::default(),
            )
        };
        let mut cache = TaskCache::new(1);
        cache.begin("a");
        cache.insert("a", state());
        cache.begin("b");
        cache.insert("b", state());
        assert_eq!(cache.len(), 2);

        cache.end("a");
        assert_eq!(cache.len(), 1);
        assert!(cache.get("a").is_none());
        assert!(cache.get("b").is_some());

        cache.end("b");
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_new_task_id_shape() {
        let id = new_task_id();
        assert!(id.starts_with("task_"));
        assert_eq!(id.len(), 13);
    }
}
