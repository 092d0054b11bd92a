//! Page, per-page result and run summary types.

use serde::{Deserialize, Serialize};

/// Hard ceiling on in-flight image jobs, whatever the configuration says.
pub const MAX_CONCURRENCY: usize = 15;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PageType {
    Cover,
    #[default]
    Content,
    Summary,
}

impl PageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PageType::Cover => "cover",
            PageType::Content => "content",
            PageType::Summary => "summary",
        }
    }

    /// Label used inside outline text and image prompts.
    pub fn label(&self) -> &'static str {
        match self {
            PageType::Cover => "封面",
            PageType::Content => "内容",
            PageType::Summary => "总结",
        }
    }
}

/// One outline page; one generated image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Page {
    pub index: usize,
    #[serde(rename = "type", default)]
    pub page_type: PageType,
    pub content: String,
}

impl Page {
    pub fn new(index: usize, page_type: PageType, content: impl Into<String>) -> Self {
        Self {
            index,
            page_type,
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PageStatus {
    Pending,
    Generating,
    Done,
    Error,
}

impl PageStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PageStatus::Pending => "pending",
            PageStatus::Generating => "generating",
            PageStatus::Done => "done",
            PageStatus::Error => "error",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, PageStatus::Done | PageStatus::Error)
    }
}

/// Terminal or in-progress state of one page, owned by the job for that index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageResult {
    pub index: usize,
    pub status: PageStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_ref: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_reason: Option<String>,
}

impl PageResult {
    pub fn pending(index: usize) -> Self {
        Self {
            index,
            status: PageStatus::Pending,
            image_ref: None,
            file_name: None,
            error_reason: None,
        }
    }

    pub fn done(index: usize, image_ref: String, file_name: String) -> Self {
        Self {
            index,
            status: PageStatus::Done,
            image_ref: Some(image_ref),
            file_name: Some(file_name),
            error_reason: None,
        }
    }

    pub fn failed(index: usize, reason: String) -> Self {
        Self {
            index,
            status: PageStatus::Error,
            image_ref: None,
            file_name: None,
            error_reason: Some(reason),
        }
    }
}

/// Final tally carried by `finish` and `retry_finish`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerationSummary {
    pub success: bool,
    pub total: usize,
    pub completed: usize,
    pub failed: usize,
}

impl GenerationSummary {
    pub fn new(completed: usize, failed: usize) -> Self {
        Self {
            success: failed == 0,
            total: completed + failed,
            completed,
            failed,
        }
    }

    pub fn empty() -> Self {
        Self::new(0, 0)
    }
}

/// How many page jobs may hold `generating` at once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConcurrencyMode {
    Sequential,
    Bounded(usize),
}

impl ConcurrencyMode {
    pub fn from_config(high_concurrency: bool, cap: usize) -> Self {
        if high_concurrency {
            ConcurrencyMode::Bounded(cap)
        } else {
            ConcurrencyMode::Sequential
        }
    }

    /// Effective limit for a batch of `page_count` jobs; never below 1.
    pub fn effective_limit(&self, page_count: usize) -> usize {
        match self {
            ConcurrencyMode::Sequential => 1,
            ConcurrencyMode::Bounded(cap) => (*cap).min(MAX_CONCURRENCY).min(page_count).max(1),
        }
    }
}

impl Default for ConcurrencyMode {
    fn default() -> Self {
        ConcurrencyMode::Sequential
    }
}
