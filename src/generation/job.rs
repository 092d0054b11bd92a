//! PageImageJob: render one page's image and persist it.

use super::page::Page;
use crate::error::ApiError;
use crate::provider::{with_deadline, ImageData, ImageRequest, ModelProviderClient};
use crate::storage::{ImageStore, StoredImage};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

pub const DEFAULT_IMAGE_TIMEOUT: Duration = Duration::from_secs(300);

/// Vendor knobs applied to every image call of a run.
#[derive(Debug, Clone)]
pub struct ImageOptions {
    pub timeout: Duration,
    pub size: Option<String>,
    pub aspect_ratio: Option<String>,
    pub quality: Option<String>,
}

impl Default for ImageOptions {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_IMAGE_TIMEOUT,
            size: None,
            aspect_ratio: Some("3:4".to_string()),
            quality: None,
        }
    }
}

/// One unit of work. Never retries itself.
#[derive(Debug, Clone)]
pub struct PageImageJob {
    pub task_id: String,
    pub page: Page,
    pub prompt: String,
    pub reference_images: Arc<Vec<ImageData>>,
    pub file_name: String,
}

/// Terminal result of a job. The image is kept so a cover can seed later pages.
#[derive(Debug)]
pub struct JobOutcome {
    pub index: usize,
    pub result: Result<StoredImage, String>,
    pub image: Option<ImageData>,
}

impl PageImageJob {
    pub async fn run(
        self,
        client: &dyn ModelProviderClient,
        store: &dyn ImageStore,
        options: &ImageOptions,
    ) -> JobOutcome {
        let index = self.page.index;
        let started = Instant::now();
        match self.execute(client, store, options).await {
            Ok((stored, image)) => {
                debug!(
                    task_id = %self.task_id,
                    index,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Page image generated"
                );
                JobOutcome {
                    index,
                    result: Ok(stored),
                    image: Some(image),
                }
            }
            Err(err) => {
                warn!(task_id = %self.task_id, index, error = %err, "Page image failed");
                JobOutcome {
                    index,
                    result: Err(err.to_string()),
                    image: None,
                }
            }
        }
    }

    async fn execute(
        &self,
        client: &dyn ModelProviderClient,
        store: &dyn ImageStore,
        options: &ImageOptions,
    ) -> Result<(StoredImage, ImageData), ApiError> {
        if self.page.content.trim().is_empty() || self.prompt.trim().is_empty() {
            return Err(ApiError::InvalidInput(format!(
                "Page {} is missing an image prompt",
                self.page.index
            )));
        }

        let request = ImageRequest {
            prompt: self.prompt.clone(),
            reference_images: self.reference_images.as_ref().clone(),
            size: options.size.clone(),
            aspect_ratio: options.aspect_ratio.clone(),
            quality: options.quality.clone(),
        };
        let image = with_deadline(options.timeout, client.generate_image(request)).await?;
        let stored = store.save(&self.task_id, &self.file_name, &image)?;
        Ok((stored, image))
    }
}
