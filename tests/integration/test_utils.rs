//! Shared test utilities for integration tests
//!
//! A scripted provider standing in for both vendors, event collection helpers, and
//! XDG isolation for configuration tests.

use async_trait::async_trait;
use notecraft::error::ProviderError;
use notecraft::generation::{
    CoordinatorSettings, ConcurrencyMode, EventSink, GenerationCoordinator, Page, PageType,
};
use notecraft::prompt::PagePromptTemplate;
use notecraft::provider::{ImageData, ImageRequest, ModelProviderClient, TextRequest};
use notecraft::storage::LocalImageStore;
use parking_lot::Mutex;
use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::mpsc::Receiver;

#[derive(Default)]
struct ScriptState {
    text_replies: VecDeque<Result<String, ProviderError>>,
    failing_prompts: HashSet<String>,
    in_flight: usize,
    high_water: usize,
    image_prompts: Vec<String>,
    text_prompts: Vec<String>,
    reference_counts: Vec<usize>,
}

/// Scripted text and image provider.
///
/// Image calls fail when the prompt equals one of the failing prompts, sleep for
/// `image_delay` otherwise, and track how many calls overlap.
pub struct ScriptedProvider {
    state: Mutex<ScriptState>,
    image_delay: Duration,
}

impl ScriptedProvider {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(ScriptState::default()),
            image_delay: Duration::from_millis(20),
        }
    }

    pub fn with_text(self, replies: Vec<Result<String, ProviderError>>) -> Self {
        self.state.lock().text_replies = replies.into();
        self
    }

    pub fn failing(self, prompts: &[&str]) -> Self {
        self.state.lock().failing_prompts = prompts.iter().map(|p| p.to_string()).collect();
        self
    }

    /// Let the given prompts succeed from now on.
    pub fn heal(&self) {
        self.state.lock().failing_prompts.clear();
    }

    pub fn high_water(&self) -> usize {
        self.state.lock().high_water
    }

    pub fn image_prompts(&self) -> Vec<String> {
        self.state.lock().image_prompts.clone()
    }

    pub fn text_prompts(&self) -> Vec<String> {
        self.state.lock().text_prompts.clone()
    }

    pub fn reference_counts(&self) -> Vec<usize> {
        self.state.lock().reference_counts.clone()
    }
}

#[async_trait]
impl ModelProviderClient for ScriptedProvider {
    async fn generate_text(&self, request: TextRequest) -> Result<String, ProviderError> {
        let mut state = self.state.lock();
        state.text_prompts.push(request.prompt);
        state
            .text_replies
            .pop_front()
            .unwrap_or_else(|| Err(ProviderError::InvalidResponse("no scripted reply".into())))
    }

    async fn generate_image(&self, request: ImageRequest) -> Result<ImageData, ProviderError> {
        let fails = {
            let mut state = self.state.lock();
            state.in_flight += 1;
            state.high_water = state.high_water.max(state.in_flight);
            state.image_prompts.push(request.prompt.clone());
            state.reference_counts.push(request.reference_images.len());
            state.failing_prompts.contains(&request.prompt)
        };
        tokio::time::sleep(self.image_delay).await;
        self.state.lock().in_flight -= 1;
        if fails {
            Err(ProviderError::Timeout(format!("scripted failure for {}", request.prompt)))
        } else {
            Ok(ImageData::new(
                [b"\x89PNG".as_slice(), request.prompt.as_bytes()].concat(),
            ))
        }
    }

    fn provider_name(&self) -> &str {
        "scripted"
    }

    fn model_name(&self) -> &str {
        "scripted-1"
    }
}

/// `n` pages; page 0 is the cover, each page's content is `page-{i}`.
pub fn pages(n: usize) -> Vec<Page> {
    (0..n)
        .map(|i| {
            let page_type = if i == 0 { PageType::Cover } else { PageType::Content };
            Page::new(i, page_type, format!("page-{}", i))
        })
        .collect()
}

/// Coordinator whose page prompt is the bare page content.
pub fn coordinator(
    provider: Arc<ScriptedProvider>,
    dir: &TempDir,
    mode: ConcurrencyMode,
) -> GenerationCoordinator {
    GenerationCoordinator::new(
        provider,
        Arc::new(LocalImageStore::new(dir.path())),
        CoordinatorSettings {
            mode,
            prompt: PagePromptTemplate::custom("{page_content}"),
            ..Default::default()
        },
    )
}

pub async fn collect<E>(mut receiver: Receiver<E>) -> Vec<E> {
    let mut events = Vec::new();
    while let Some(event) = receiver.recv().await {
        events.push(event);
    }
    events
}

/// Run `f` with a sink and collect every event it produced.
pub async fn run_collecting<E, T, F, Fut>(f: F) -> (T, Vec<E>)
where
    E: Send,
    F: FnOnce(EventSink<E>) -> Fut,
    Fut: std::future::Future<Output = T>,
{
    let (sink, receiver) = EventSink::new_pair(256);
    let (result, events) = tokio::join!(f(sink), collect(receiver));
    (result, events)
}

/// Global mutex to serialize XDG environment variable access across all tests
static XDG_ENV_MUTEX: Mutex<()> = parking_lot::const_mutex(());

/// Run `f` with HOME and XDG_CONFIG_HOME pointed into `test_dir`, restoring both after.
pub fn with_xdg_env<F, R>(test_dir: &TempDir, f: F) -> R
where
    F: FnOnce() -> R,
{
    let _guard = XDG_ENV_MUTEX.lock();
    let home = std::env::var("HOME").ok();
    let xdg_config_home = std::env::var("XDG_CONFIG_HOME").ok();

    let test_home = test_dir.path().join("home");
    std::fs::create_dir_all(&test_home).unwrap();
    std::env::set_var("HOME", &test_home);
    std::env::set_var("XDG_CONFIG_HOME", test_dir.path());

    let result = f();

    match home {
        Some(value) => std::env::set_var("HOME", value),
        None => std::env::remove_var("HOME"),
    }
    match xdg_config_home {
        Some(value) => std::env::set_var("XDG_CONFIG_HOME", value),
        None => std::env::remove_var("XDG_CONFIG_HOME"),
    }
    result
}
