//! Shared plumbing for single-call text stages (outline, content, concept steps).

use crate::error::ApiError;
use crate::provider::{with_deadline, ModelProviderClient, TextRequest};
use std::time::Duration;
use tracing::debug;

pub const DEFAULT_STAGE_TIMEOUT: Duration = Duration::from_secs(120);

/// Per-call settings for a text stage.
#[derive(Debug, Clone)]
pub struct StageOptions {
    pub timeout: Duration,
    pub temperature: Option<f32>,
    pub max_output_tokens: Option<u32>,
}

impl Default for StageOptions {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_STAGE_TIMEOUT,
            temperature: None,
            max_output_tokens: None,
        }
    }
}

impl StageOptions {
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_max_output_tokens(mut self, max_output_tokens: u32) -> Self {
        self.max_output_tokens = Some(max_output_tokens);
        self
    }
}

/// Run one text call under the stage deadline.
pub async fn call_text(
    stage: &str,
    client: &dyn ModelProviderClient,
    options: &StageOptions,
    mut request: TextRequest,
) -> Result<String, ApiError> {
    if request.prompt.trim().is_empty() {
        return Err(ApiError::InvalidInput(format!("{} prompt is empty", stage)));
    }
    if request.temperature.is_none() {
        request.temperature = options.temperature;
    }
    if request.max_output_tokens.is_none() {
        request.max_output_tokens = options.max_output_tokens;
    }

    let started = std::time::Instant::now();
    let reply = with_deadline(options.timeout, client.generate_text(request)).await?;
    debug!(
        stage,
        provider = client.provider_name(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        chars = reply.len(),
        "Stage text call finished"
    );
    Ok(reply)
}
